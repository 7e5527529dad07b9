//! Admission review wire types (`admission.k8s.io/v1`).
//!
//! The gateway only needs a handful of fields from the review envelope, so
//! these are kept as plain serde structs instead of pulling the full generated
//! API types. The admitted object is held as a [`RawValue`] so it can be
//! forwarded to decision services byte-for-byte.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

/// API version stamped on every outbound review envelope
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
/// Kind stamped on every outbound review envelope
pub const ADMISSION_KIND: &str = "AdmissionReview";

/// Group/version/resource triple
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupVersionResource {
    /// API group ("" for the core group)
    pub group: String,
    /// API version
    pub version: String,
    /// Plural resource name
    pub resource: String,
}

impl GroupVersionResource {
    /// Build a descriptor
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Core `v1` pods
    #[must_use]
    pub fn pods() -> Self {
        Self::new("", "v1", "pods")
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}, Resource={}", self.version, self.resource)
        } else {
            write!(f, "{}/{}, Resource={}", self.group, self.version, self.resource)
        }
    }
}

/// Group/version/kind triple
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupVersionKind {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
}

/// Outer admission review envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// `admission.k8s.io/v1`
    #[serde(default)]
    pub api_version: String,
    /// `AdmissionReview`
    #[serde(default)]
    pub kind: String,
    /// Request half (inbound)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    /// Response half (outbound)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wrap a response in an envelope carrying the expected apiVersion/kind.
    #[must_use]
    pub fn from_response(response: AdmissionResponse) -> Self {
        Self {
            api_version: ADMISSION_API_VERSION.to_string(),
            kind: ADMISSION_KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}

/// Admission request as sent by the API server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Opaque request identifier, echoed on the response
    pub uid: String,
    /// Kind of the object
    #[serde(default)]
    pub kind: GroupVersionKind,
    /// Resource being admitted
    #[serde(default)]
    pub resource: GroupVersionResource,
    /// Subresource, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_resource: Option<String>,
    /// Object name (may be empty on generateName creates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Target namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// CREATE, UPDATE, DELETE, CONNECT
    #[serde(default)]
    pub operation: String,
    /// Requesting user; passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
    /// Admitted object, kept in its received encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Box<RawValue>>,
    /// Previous object on UPDATE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Box<RawValue>>,
    /// Dry-run flag; informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl AdmissionRequest {
    /// Dry-run flag with the API default applied
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run.unwrap_or(false)
    }

    /// Raw object bytes as received
    #[must_use]
    pub fn object_bytes(&self) -> Option<&[u8]> {
        self.object.as_deref().map(|raw| raw.get().as_bytes())
    }

    /// Namespace and name the review is about.
    ///
    /// Missing request fields fall back to the admitted object's
    /// `metadata`, which is parsed at most once.
    #[must_use]
    pub fn target(&self) -> ReviewTarget {
        let namespace = self.namespace.clone().filter(|ns| !ns.is_empty());
        let name = self.name.clone().filter(|n| !n.is_empty());
        if namespace.is_some() && name.is_some() {
            return ReviewTarget { namespace, name };
        }

        let meta = self
            .object
            .as_deref()
            .and_then(|raw| serde_json::from_str::<ObjectMetaNamespace>(raw.get()).ok())
            .map(|object| object.metadata)
            .unwrap_or_default();
        ReviewTarget {
            namespace: namespace.or_else(|| meta.namespace.filter(|ns| !ns.is_empty())),
            name: name.or(meta.name).or(meta.generate_name),
        }
    }
}

/// Where a review is routed, and what it is about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewTarget {
    /// Namespace the review is routed on
    pub namespace: Option<String>,
    /// Object name (or `generateName`), for logging
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct ObjectMetaNamespace {
    #[serde(default)]
    metadata: PartialMeta,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialMeta {
    name: Option<String>,
    generate_name: Option<String>,
    namespace: Option<String>,
}

/// `metav1.Status` subset carried on denials and errors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Status {
    /// "Success" or "Failure"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Human readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Machine readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// HTTP-style status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl Status {
    /// Failure status with a code and message
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            status: Some("Failure".to_string()),
            message: Some(message.into()),
            reason: None,
            code: Some(code),
        }
    }
}

/// Patch encoding tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    /// RFC 6902 JSON patch
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// Admission response returned to the API server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Request UID, echoed verbatim
    pub uid: String,
    /// Verdict
    pub allowed: bool,
    /// Denial or error detail (`status` on the wire)
    #[serde(default, rename = "status", skip_serializing_if = "Option::is_none")]
    pub result: Option<Status>,
    /// Raw JSON patch bytes (base64 on the wire)
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub patch: Option<Vec<u8>>,
    /// Present exactly when `patch` is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
    /// Warnings surfaced to the API client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

impl AdmissionResponse {
    /// Allowing response with no patch
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            ..Self::default()
        }
    }

    /// Denying response with a status code and message
    pub fn deny(uid: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            result: Some(Status::failure(code, message)),
            ..Self::default()
        }
    }

    /// Attach raw JSON patch bytes. The bytes are not re-serialized.
    #[must_use]
    pub fn with_json_patch(mut self, patch: Vec<u8>) -> Self {
        self.patch = Some(patch);
        self.patch_type = Some(PatchType::JsonPatch);
        self
    }

    /// Attach a result message without changing the verdict
    #[must_use]
    pub fn with_message(mut self, code: i32, message: impl Into<String>) -> Self {
        self.result = Some(Status {
            status: None,
            message: Some(message.into()),
            reason: None,
            code: Some(code),
        });
        self
    }
}

/// RFC 6902 operation name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// add
    Add,
    /// remove
    Remove,
    /// replace
    Replace,
    /// move
    Move,
    /// copy
    Copy,
    /// test
    Test,
}

/// One JSON patch operation.
///
/// Only used to check that a decision service answered with a patch list;
/// the gateway forwards the original bytes, not a re-serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    /// Operation
    pub op: PatchOp,
    /// JSON pointer into the target object
    pub path: String,
    /// Source pointer for move/copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Value for add/replace/test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Best-effort UID extraction from an envelope that failed to decode.
///
/// Returns an empty string when the body is not JSON or has no
/// `request.uid` string.
#[must_use]
pub fn recover_uid(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/request/uid")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_default()
}

/// `[]byte` fields are base64 strings in Kubernetes JSON.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_str(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const POD_REVIEW: &str = r#"{
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "namespace": "ns-a",
            "operation": "CREATE",
            "object": {"apiVersion":"v1","kind":"Pod","metadata":{"name":"web","namespace":"ns-a"}}
        }
    }"#;

    #[test]
    fn decodes_pod_review_and_keeps_raw_object() {
        let review: AdmissionReview = serde_json::from_str(POD_REVIEW).unwrap();
        let request = review.request.unwrap();

        assert_eq!(request.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(request.resource, GroupVersionResource::pods());
        assert!(!request.is_dry_run());
        assert_eq!(
            request.object_bytes().unwrap(),
            br#"{"apiVersion":"v1","kind":"Pod","metadata":{"name":"web","namespace":"ns-a"}}"#
        );
        assert_eq!(
            request.target(),
            ReviewTarget {
                namespace: Some("ns-a".to_string()),
                name: Some("web".to_string()),
            }
        );
    }

    #[test]
    fn target_falls_back_to_object_metadata() {
        let json = r#"{"uid":"u1","object":{"metadata":{"namespace":"from-object","generateName":"web-"}}}"#;
        let request: AdmissionRequest = serde_json::from_str(json).unwrap();
        let target = request.target();
        assert_eq!(target.namespace.as_deref(), Some("from-object"));
        assert_eq!(target.name.as_deref(), Some("web-"));

        let json = r#"{"uid":"u1","namespace":"","object":{"metadata":{}}}"#;
        let request: AdmissionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.target(), ReviewTarget::default());
    }

    #[test]
    fn target_skips_the_object_when_the_request_names_it() {
        // The object is not valid metadata; only request fields are used
        let json = r#"{"uid":"u1","namespace":"ns-a","name":"web","object":{"metadata":"not-an-object"}}"#;
        let request: AdmissionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request.target(),
            ReviewTarget {
                namespace: Some("ns-a".to_string()),
                name: Some("web".to_string()),
            }
        );
    }

    #[test]
    fn response_encodes_patch_as_base64_with_patch_type() {
        let patch = br#"[{"op":"add","path":"/metadata/labels/x","value":"y"}]"#.to_vec();
        let review = AdmissionReview::from_response(AdmissionResponse::allow("u1").with_json_patch(patch.clone()));

        let json: Value = serde_json::to_value(&review).unwrap();
        assert_eq!(json["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(json["kind"], "AdmissionReview");
        assert_eq!(json["response"]["patchType"], "JSONPatch");

        let encoded = json["response"]["patch"].as_str().unwrap();
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).unwrap();
        assert_eq!(decoded, patch);

        let back: AdmissionReview = serde_json::from_value(json).unwrap();
        assert_eq!(back.response.unwrap().patch, Some(patch));
    }

    #[test]
    fn allow_response_omits_patch_and_status() {
        let json = serde_json::to_value(AdmissionResponse::allow("u2")).unwrap();
        assert_eq!(json, serde_json::json!({"uid": "u2", "allowed": true}));
    }

    #[test]
    fn deny_response_carries_code_under_status() {
        let json = serde_json::to_value(AdmissionResponse::deny("u3", 500, "boom")).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["status"]["code"], 500);
        assert_eq!(json["status"]["message"], "boom");
    }

    #[test]
    fn patch_operations_reject_unknown_ops() {
        let ok: Vec<PatchOperation> =
            serde_json::from_str(r#"[{"op":"remove","path":"/spec/x"}]"#).unwrap();
        assert_eq!(ok[0].op, PatchOp::Remove);

        let bad = serde_json::from_str::<Vec<PatchOperation>>(r#"[{"op":"frobnicate","path":"/"}]"#);
        assert!(bad.is_err());
    }

    #[test]
    fn recover_uid_handles_partial_and_garbage_bodies() {
        assert_eq!(recover_uid(br#"{"request":{"uid":"abc","resource":7}}"#), "abc");
        assert_eq!(recover_uid(b"not json"), "");
        assert_eq!(recover_uid(br#"{"request":{}}"#), "");
    }
}
