//! Decision forwarder - posts the admitted object to a decision service
//!
//! One POST per review, no retries. Every failure comes back as an
//! [`Error`] and the dispatcher turns it into the vertical's default verdict.

use std::time::Instant;

use bytes::Bytes;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::review::{AdmissionResponse, PatchOperation, Status};
use crate::config::ForwardConfig;
use crate::{Error, Result};

/// Verdict returned by a validation decision service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidationVerdict {
    /// Whether the object is admitted
    pub allowed: bool,
    /// Optional explanation; accepted as `status` or `result`
    #[serde(default, alias = "result")]
    pub status: Option<Status>,
    /// Optional warnings passed to the API client
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

impl ValidationVerdict {
    /// Adopt the verdict for the review identified by `uid`
    pub fn into_response(self, uid: impl Into<String>) -> AdmissionResponse {
        AdmissionResponse {
            uid: uid.into(),
            allowed: self.allowed,
            result: self.status,
            warnings: self.warnings,
            ..AdmissionResponse::default()
        }
    }
}

/// HTTP client for decision services
pub struct DecisionForwarder {
    client: Client,
}

impl DecisionForwarder {
    /// Build a forwarder from the outbound settings
    pub fn new(config: &ForwardConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .user_agent(crate::user_agent())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Build a forwarder around an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// POST `object` to `endpoint` and return the body of a 200 response.
    pub async fn post(&self, endpoint: &str, object: &[u8]) -> Result<Bytes> {
        let url = parse_endpoint(endpoint)?;
        let started = Instant::now();

        let response = self
            .client
            .post(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(object.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("decision endpoint {endpoint}: {e}"))
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::UpstreamStatus(status));
        }

        let body = response.bytes().await?;
        debug!(
            endpoint,
            status = status.as_u16(),
            body_len = body.len(),
            elapsed = ?started.elapsed(),
            "Decision endpoint answered"
        );
        Ok(body)
    }

    /// Forward for mutation. The body must be a JSON patch list; the raw
    /// bytes are returned so the patch reaches the API server verbatim.
    pub async fn forward_mutation(&self, endpoint: &str, object: &[u8]) -> Result<Vec<u8>> {
        let body = self.post(endpoint, object).await?;
        serde_json::from_slice::<Vec<PatchOperation>>(&body).map_err(|e| {
            Error::MalformedDecision(format!("response body is not a JSON patch list: {e}"))
        })?;
        Ok(body.to_vec())
    }

    /// Forward for validation. The body must be an admission-response
    /// shaped object.
    pub async fn forward_validation(&self, endpoint: &str, object: &[u8]) -> Result<ValidationVerdict> {
        let body = self.post(endpoint, object).await?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::MalformedDecision(format!("response body is not an admission response: {e}"))
        })
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::Forward(format!("invalid endpoint '{endpoint}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Forward(format!(
            "invalid endpoint '{endpoint}': unsupported scheme '{other}'"
        ))),
    }
}
