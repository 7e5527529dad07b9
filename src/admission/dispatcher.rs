//! Review dispatcher.
//!
//! Drives one admission review through
//! `Decoded → TypeChecked → Resolved → Forwarded → Assembled` and owns the
//! per-vertical defaults:
//!
//! | Vertical | no endpoint | resolve/forward failure | success |
//! |----------|-------------|-------------------------|---------|
//! | mutate   | allow       | allow, no patch         | allow + patch |
//! | validate | allow       | deny, code 500          | downstream verdict |
//!
//! A resource type mismatch produces no verdict at all.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::forwarder::DecisionForwarder;
use super::guard::check_resource;
use super::resolver::{EndpointResolver, Resolution, Vertical};
use super::review::{AdmissionRequest, AdmissionResponse, AdmissionReview, GroupVersionResource, recover_uid};
use crate::metrics::{self, FallbackKind, ReviewOutcome};
use crate::{Error, Result};

/// Code carried on validation denials caused by gateway-side failures
pub const FAILURE_CODE: i32 = 500;

/// Code carried on responses to undecodable envelopes
pub const DECODE_FAILURE_CODE: i32 = 400;

/// Furthest stage a review reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DispatchStage {
    /// Envelope decoded
    Decoded,
    /// Resource type confirmed
    TypeChecked,
    /// Endpoint resolved (or found unconfigured)
    Resolved,
    /// Decision service answered
    Forwarded,
    /// Response built
    Assembled,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Decoded => "decoded",
            Self::TypeChecked => "type_checked",
            Self::Resolved => "resolved",
            Self::Forwarded => "forwarded",
            Self::Assembled => "assembled",
        };
        f.write_str(s)
    }
}

/// Result of handling one inbound call
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Review envelope to return with 200
    Review(AdmissionReview),
    /// Wiring error; nothing should be returned as a verdict
    NoVerdict(String),
    /// Rejected before decoding (bad content type)
    Rejected(String),
}

/// Orchestrates guard, resolver and forwarder for both verticals
pub struct ReviewDispatcher {
    resolver: EndpointResolver,
    forwarder: DecisionForwarder,
    expected_resource: GroupVersionResource,
    review_timeout: Duration,
}

impl ReviewDispatcher {
    /// Create a dispatcher serving core `v1` pods
    #[must_use]
    pub fn new(resolver: EndpointResolver, forwarder: DecisionForwarder, review_timeout: Duration) -> Self {
        Self {
            resolver,
            forwarder,
            expected_resource: GroupVersionResource::pods(),
            review_timeout,
        }
    }

    /// Serve a different resource than pods
    #[must_use]
    pub fn with_expected_resource(mut self, resource: GroupVersionResource) -> Self {
        self.expected_resource = resource;
        self
    }

    /// Handle a raw inbound call: content type check, envelope decode, review.
    pub async fn handle(&self, vertical: Vertical, content_type: Option<&str>, body: &[u8]) -> DispatchOutcome {
        if !is_json(content_type) {
            let content_type = content_type.unwrap_or_default();
            warn!(vertical = %vertical, content_type, "Rejected non-JSON admission call");
            return DispatchOutcome::Rejected(format!(
                "contentType={content_type}, expected application/json"
            ));
        }

        let review: AdmissionReview = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(e) => {
                let uid = recover_uid(body);
                error!(vertical = %vertical, uid, error = %e, "Failed to decode admission review");
                return DispatchOutcome::Review(decode_failure(vertical, uid, e.to_string()));
            }
        };

        let Some(request) = review.request else {
            error!(vertical = %vertical, "Admission review carries no request");
            return DispatchOutcome::Review(decode_failure(
                vertical,
                String::new(),
                "admission review carries no request".to_string(),
            ));
        };

        match self.review(vertical, &request).await {
            Ok(response) => DispatchOutcome::Review(AdmissionReview::from_response(response)),
            Err(e) => DispatchOutcome::NoVerdict(e.to_string()),
        }
    }

    /// Review a decoded request.
    ///
    /// Only a resource type mismatch is returned as an error; every other
    /// failure is folded into the vertical's default verdict.
    pub async fn review(&self, vertical: Vertical, request: &AdmissionRequest) -> Result<AdmissionResponse> {
        let uid = request.uid.as_str();
        let target = request.target();
        info!(
            uid,
            vertical = %vertical,
            operation = %request.operation,
            namespace = target.namespace.as_deref().unwrap_or_default(),
            object = target.name.as_deref().unwrap_or_default(),
            dry_run = request.is_dry_run(),
            "Started admission review"
        );

        if let Err(e) = check_resource(&request.resource, &self.expected_resource) {
            error!(uid, vertical = %vertical, error = %e, "Unexpected resource, no admission response produced");
            metrics::record_review(vertical, ReviewOutcome::NoVerdict);
            return Err(e);
        }

        let mut stage = DispatchStage::TypeChecked;
        let decided = tokio::time::timeout(
            self.review_timeout,
            self.decide(vertical, request, target.namespace.as_deref(), &mut stage),
        )
        .await;
        let mut response = match decided {
            Ok(response) => response,
            Err(_) => {
                let e = Error::Timeout(format!("review exceeded {:?}", self.review_timeout));
                fallback(vertical, uid, &e, stage)
            }
        };
        stage = DispatchStage::Assembled;

        // The UID always comes from the request, whatever the decision service sent.
        response.uid = request.uid.clone();

        let outcome = if !response.allowed {
            ReviewOutcome::Denied
        } else if response.patch.is_some() {
            ReviewOutcome::Patched
        } else {
            ReviewOutcome::Allowed
        };
        metrics::record_review(vertical, outcome);

        info!(
            uid,
            vertical = %vertical,
            stage = %stage,
            allowed = response.allowed,
            patched = response.patch.is_some(),
            "Sending admission response"
        );
        Ok(response)
    }

    async fn decide(
        &self,
        vertical: Vertical,
        request: &AdmissionRequest,
        namespace: Option<&str>,
        stage: &mut DispatchStage,
    ) -> AdmissionResponse {
        let uid = request.uid.as_str();

        let Some(namespace) = namespace else {
            let e = Error::Resolution {
                namespace: String::new(),
                message: "request carries no namespace".to_string(),
            };
            return fallback(vertical, uid, &e, *stage);
        };

        let endpoint = match self.resolver.resolve(namespace, vertical).await {
            Ok(Resolution::Endpoint(endpoint)) => endpoint,
            Ok(Resolution::NotConfigured) => {
                *stage = DispatchStage::Resolved;
                info!(
                    uid,
                    vertical = %vertical,
                    namespace,
                    annotation = self.resolver.annotations().key(vertical),
                    "No endpoint configured for namespace"
                );
                return AdmissionResponse::allow(uid);
            }
            Err(e) => return fallback(vertical, uid, &e, *stage),
        };
        *stage = DispatchStage::Resolved;
        debug!(uid, vertical = %vertical, namespace, endpoint, "Forwarding to decision endpoint");

        let Some(object) = request.object_bytes() else {
            let e = Error::Forward("request carries no object".to_string());
            return fallback(vertical, uid, &e, *stage);
        };

        match vertical {
            Vertical::Mutate => match self.forwarder.forward_mutation(&endpoint, object).await {
                Ok(patch) => {
                    *stage = DispatchStage::Forwarded;
                    AdmissionResponse::allow(uid).with_json_patch(patch)
                }
                Err(e) => fallback(vertical, uid, &e, *stage),
            },
            Vertical::Validate => match self.forwarder.forward_validation(&endpoint, object).await {
                Ok(verdict) => {
                    *stage = DispatchStage::Forwarded;
                    verdict.into_response(uid)
                }
                Err(e) => fallback(vertical, uid, &e, *stage),
            },
        }
    }
}

/// Default verdict after a resolution or forwarding failure.
fn fallback(vertical: Vertical, uid: &str, err: &Error, stage: DispatchStage) -> AdmissionResponse {
    let kind = if stage < DispatchStage::Resolved {
        FallbackKind::Resolve
    } else {
        FallbackKind::Forward
    };
    metrics::record_fallback(vertical, kind);
    let recoverable = err.is_recoverable();
    match vertical {
        Vertical::Mutate => {
            warn!(uid, vertical = %vertical, stage = %stage, recoverable, error = %err, "Mutation skipped, admitting without patch");
            AdmissionResponse::allow(uid)
        }
        Vertical::Validate => {
            error!(uid, vertical = %vertical, stage = %stage, recoverable, error = %err, "Validation failed closed");
            AdmissionResponse::deny(uid, FAILURE_CODE, format!("validation endpoint failure: {err}"))
        }
    }
}

/// Response for an envelope that could not be decoded. Mutation still admits.
fn decode_failure(vertical: Vertical, uid: String, message: String) -> AdmissionReview {
    metrics::record_review(vertical, ReviewOutcome::DecodeError);
    let response = match vertical {
        Vertical::Mutate => AdmissionResponse::allow(uid).with_message(DECODE_FAILURE_CODE, message),
        Vertical::Validate => AdmissionResponse::deny(uid, DECODE_FAILURE_CODE, message),
    };
    AdmissionReview::from_response(response)
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_essence_is_compared() {
        assert!(is_json(Some("application/json")));
        assert!(is_json(Some("application/json; charset=utf-8")));
        assert!(is_json(Some("Application/JSON")));
        assert!(!is_json(Some("text/plain")));
        assert!(!is_json(Some("application/yaml")));
        assert!(!is_json(None));
    }

    #[test]
    fn decode_failure_keeps_mutation_admitting() {
        let review = decode_failure(Vertical::Mutate, "u1".to_string(), "bad".to_string());
        let response = review.response.unwrap();
        assert!(response.allowed);
        assert_eq!(response.uid, "u1");
        assert_eq!(response.result.unwrap().message.as_deref(), Some("bad"));

        let review = decode_failure(Vertical::Validate, String::new(), "bad".to_string());
        let response = review.response.unwrap();
        assert!(!response.allowed);
        assert_eq!(response.result.unwrap().code, Some(DECODE_FAILURE_CODE));
    }

    #[test]
    fn fallbacks_are_counted_by_failing_step() {
        let capture = crate::metrics::testing::Capture::default();
        let err = Error::Forward("connection refused".to_string());
        telemetry_metrics::with_local_recorder(&capture, || {
            fallback(Vertical::Validate, "u1", &err, DispatchStage::TypeChecked);
            fallback(Vertical::Mutate, "u2", &err, DispatchStage::Resolved);
        });

        let kinds: Vec<String> = capture
            .labels("admission_fallbacks_total")
            .into_iter()
            .flat_map(|labels| labels.into_iter().filter(|(k, _)| k == "kind").map(|(_, v)| v))
            .collect();
        assert_eq!(kinds, vec!["resolve".to_string(), "forward".to_string()]);
    }

    #[test]
    fn stages_are_ordered() {
        assert!(DispatchStage::Decoded < DispatchStage::TypeChecked);
        assert!(DispatchStage::Forwarded < DispatchStage::Assembled);
        assert_eq!(DispatchStage::TypeChecked.to_string(), "type_checked");
    }
}
