//! Admission review handling.
//!
//! - `review` - wire types for the `admission.k8s.io/v1` envelope
//! - `guard` - resource type check
//! - `resolver` - namespace annotation lookup
//! - `forwarder` - decision service client
//! - `dispatcher` - the review pipeline and per-vertical defaults

pub mod dispatcher;
pub mod forwarder;
pub mod guard;
pub mod resolver;
pub mod review;

pub use dispatcher::{DispatchOutcome, DispatchStage, ReviewDispatcher};
pub use forwarder::{DecisionForwarder, ValidationVerdict};
pub use guard::check_resource;
pub use resolver::{
    EndpointResolver, KubeNamespaceLookup, NamespaceLookup, Resolution, RoutingAnnotations, Vertical,
};
pub use review::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, GroupVersionKind, GroupVersionResource,
    PatchOp, PatchOperation, PatchType, ReviewTarget, Status, recover_uid,
};
