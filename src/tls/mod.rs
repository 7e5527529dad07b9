//! Serving certificate loading and hot-reload.

pub mod keypair;
pub mod reloader;

pub use keypair::{CertificateMaterial, load_certs, load_private_key};
pub use reloader::{Clock, KeypairReloader, ReloadOutcome, ReloadSchedule, SystemClock};
