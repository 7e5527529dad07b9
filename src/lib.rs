//! Admission Gateway Library
//!
//! Kubernetes admission gateway that routes `mutate` and `validate` reviews to
//! decision services named by annotations on the admitted object's namespace.
//!
//! # Features
//!
//! - **Dynamic routing**: endpoint per namespace, read live on every review
//! - **Asymmetric defaults**: mutation always admits, validation fails closed
//!   once a namespace opts in
//! - **Certificate hot-reload**: serving certificate swapped near expiry
//!   without dropping connections
//! - **Production Ready**: structured logging, metrics, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod tls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Service name reported on `GET /` and in the outbound `User-Agent`
pub const SERVICE_NAME: &str = "admission-gateway";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `User-Agent` sent to decision services
#[must_use]
pub fn user_agent() -> String {
    format!("{SERVICE_NAME}/{VERSION}")
}

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to install log subscriber: {e}")))?;
        }
        _ => {
            subscriber
                .with(fmt::layer())
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to install log subscriber: {e}")))?;
        }
    }

    Ok(())
}
