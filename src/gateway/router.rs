//! HTTP router and handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, MatchedPath, Request, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    timeout::{RequestBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

use crate::admission::{DispatchOutcome, ReviewDispatcher, Vertical};
use crate::config::ServerConfig;
use crate::tls::KeypairReloader;

/// Shared application state
pub struct AppState {
    /// Review pipeline
    pub dispatcher: Arc<ReviewDispatcher>,
    /// Reported on `GET /`
    pub mode: String,
    /// Serving certificate, when TLS is on
    pub certificates: Option<Arc<KeypairReloader>>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(info_handler))
        .route("/health", get(health_handler))
        .route("/mutate", post(mutate_handler))
        .route("/validate", post(validate_handler))
        .route_layer(middleware::from_fn(record_http))
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(RequestBodyTimeoutLayer::new(server.read_timeout))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, server.request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Per-route request count and latency
async fn record_http(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(String::new, |path| path.as_str().to_string());
    let started = Instant::now();

    let response = next.run(request).await;
    crate::metrics::record_http_request(method.as_str(), &route, response.status().as_u16(), started.elapsed());
    response
}

/// GET / - service identity
async fn info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "service": crate::SERVICE_NAME,
        "version": crate::VERSION,
        "mode": state.mode,
    }))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let certificate = state.certificates.as_ref().map(|reloader| {
        let current = reloader.current();
        json!({
            "subject": current.subject(),
            "expires_at": current.expires_at(),
            "expires_in_secs": current.expires_in(chrono::Utc::now().timestamp()),
        })
    });

    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "certificate": certificate,
    }))
}

/// POST /mutate
async fn mutate_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    admission(&state, Vertical::Mutate, &headers, &body).await
}

/// POST /validate
async fn validate_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    admission(&state, Vertical::Validate, &headers, &body).await
}

async fn admission(state: &AppState, vertical: Vertical, headers: &HeaderMap, body: &[u8]) -> Response {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());

    match state.dispatcher.handle(vertical, content_type, body).await {
        DispatchOutcome::Review(review) => (StatusCode::OK, Json(review)).into_response(),
        DispatchOutcome::Rejected(message) => {
            warn!(vertical = %vertical, error = %message, "Admission call rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        DispatchOutcome::NoVerdict(message) => {
            error!(vertical = %vertical, error = %message, "No admission verdict produced");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
        }
    }
}
