//! HTTP surface tests driven through `tower::ServiceExt::oneshot`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use admission_gateway::admission::{
    DecisionForwarder, EndpointResolver, NamespaceLookup, ReviewDispatcher, RoutingAnnotations,
};
use admission_gateway::config::{ForwardConfig, RoutingConfig, ServerConfig};
use admission_gateway::gateway::{AppState, create_router};
use admission_gateway::{Error, Result};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

struct EmptyNamespaces;

#[async_trait]
impl NamespaceLookup for EmptyNamespaces {
    async fn annotations(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        if namespace == "default" {
            Ok(BTreeMap::new())
        } else {
            Err(Error::Resolution {
                namespace: namespace.to_string(),
                message: "not found".to_string(),
            })
        }
    }
}

/// Namespace read that never completes
struct StalledNamespaces;

#[async_trait]
impl NamespaceLookup for StalledNamespaces {
    async fn annotations(&self, _namespace: &str) -> Result<BTreeMap<String, String>> {
        std::future::pending().await
    }
}

fn app() -> Router {
    app_with(Arc::new(EmptyNamespaces), &ServerConfig::default())
}

fn app_with(lookup: Arc<dyn NamespaceLookup>, server: &ServerConfig) -> Router {
    let resolver = EndpointResolver::new(lookup, RoutingAnnotations::from(&RoutingConfig::default()));
    let forwarder = DecisionForwarder::new(&ForwardConfig::default()).unwrap();
    let dispatcher = ReviewDispatcher::new(resolver, forwarder, Duration::from_secs(8));

    let state = Arc::new(AppState {
        dispatcher: Arc::new(dispatcher),
        mode: "debug".to_string(),
        certificates: None,
    });
    create_router(state, server)
}

fn admission_request(path: &str, content_type: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn pod_review(uid: &str, namespace: &str, resource: &str) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "resource": {"group": "", "version": "v1", "resource": resource},
            "namespace": namespace,
            "operation": "CREATE",
            "object": {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "web"}}
        }
    })
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn root_reports_service_identity() {
    let response = app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["service"], "admission-gateway");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["mode"], "debug");
}

#[tokio::test]
async fn health_is_ok_without_tls() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["certificate"].is_null());
}

#[tokio::test]
async fn validate_returns_review_envelope() {
    let response = app()
        .oneshot(admission_request(
            "/validate",
            "application/json",
            pod_review("uid-1", "default", "pods"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(
        body,
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "response": {"uid": "uid-1", "allowed": true}
        })
    );
}

#[tokio::test]
async fn mutate_with_unknown_namespace_still_admits() {
    let response = app()
        .oneshot(admission_request(
            "/mutate",
            "application/json",
            pod_review("uid-2", "nowhere", "pods"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["response"]["uid"], "uid-2");
    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"].get("patch").is_none());
}

#[tokio::test]
async fn wrong_content_type_is_a_bad_request() {
    let response = app()
        .oneshot(admission_request(
            "/mutate",
            "text/plain",
            pod_review("uid-3", "default", "pods"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("application/json"));
}

#[tokio::test]
async fn wrong_resource_gets_no_verdict() {
    let response = app()
        .oneshot(admission_request(
            "/validate",
            "application/json",
            pod_review("uid-4", "default", "services"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body.get("response").is_none());
    assert!(body["error"].as_str().unwrap().contains("services"));
}

#[tokio::test]
async fn get_on_admission_route_is_not_allowed() {
    let response = app()
        .oneshot(Request::builder().uri("/mutate").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn slow_review_times_out_with_408() {
    let server = ServerConfig {
        request_timeout: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let response = app_with(Arc::new(StalledNamespaces), &server)
        .oneshot(admission_request(
            "/validate",
            "application/json",
            pod_review("uid-5", "default", "pods"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
}
