//! Error types for the admission gateway

use std::io;

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias for the admission gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Admission gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The admitted object is not the resource this gateway is wired for
    #[error("unexpected resource: expected {expected}, received {received}")]
    UnexpectedResource {
        /// Expected group/version/resource
        expected: String,
        /// Group/version/resource on the request
        received: String,
    },

    /// Namespace lookup failed
    #[error("unable to get namespace {namespace}: {message}")]
    Resolution {
        /// Namespace that was looked up
        namespace: String,
        /// Underlying failure
        message: String,
    },

    /// Request to the decision endpoint could not be built or sent
    #[error("Forwarding error: {0}")]
    Forward(String),

    /// Decision endpoint answered with something other than 200
    #[error("decision endpoint returned non-200 status: {0}")]
    UpstreamStatus(StatusCode),

    /// Decision endpoint body was not the expected shape
    #[error("malformed decision response: {0}")]
    MalformedDecision(String),

    /// A bounded operation ran out of time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error belongs to the recoverable per-review class
    /// (resolution or forwarding) that degrades to a vertical's default verdict.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Resolution { .. }
                | Self::Forward(_)
                | Self::UpstreamStatus(_)
                | Self::MalformedDecision(_)
                | Self::Timeout(_)
                | Self::Http(_)
                | Self::Json(_)
                | Self::Kube(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_message_names_the_status() {
        let err = Error::UpstreamStatus(StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn wiring_and_protocol_errors_are_not_recoverable() {
        let wiring = Error::UnexpectedResource {
            expected: "/v1, Resource=pods".to_string(),
            received: "apps/v1, Resource=deployments".to_string(),
        };
        assert!(!wiring.is_recoverable());
        assert!(!Error::Config("bad".to_string()).is_recoverable());
        assert!(Error::Timeout("late".to_string()).is_recoverable());
    }
}
