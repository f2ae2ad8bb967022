//! Intercepting HTTP proxy.
//!
//! Every request outside the reserved control prefix is turned into an
//! [`InterceptedRequest`] and handed to the router:
//! - POST /__offline/control: control messages (JSON)
//! - GET /__offline/health: lifecycle state and partition sizes
//! - GET /__offline/metrics: Prometheus exposition
//! - anything else: routed through the cache layer

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Url;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::cache::partition::PartitionKind;
use crate::http::{InterceptedRequest, StoredResponse};
use crate::layer::control::{ControlHandle, ControlMessage, ControlReply};
use crate::layer::lifecycle::LifecycleState;
use crate::layer::Layer;

pub const CONTROL_PREFIX: &str = "/__offline";

/// Application state shared across handlers.
pub struct AppState {
    pub layer: Arc<Layer>,
    pub control: ControlHandle,
    pub upstream: Url,
    pub max_body_bytes: usize,
    pub start_time: Instant,
}

/// Build the axum router with the control routes and the intercepting fallback.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&format!("{CONTROL_PREFIX}/control"), post(control))
        .route(&format!("{CONTROL_PREFIX}/health"), get(health))
        .route(&format!("{CONTROL_PREFIX}/metrics"), get(metrics))
        .fallback(intercept)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: LifecycleState,
    pub uptime_secs: u64,
    pub partitions: Vec<PartitionStatsResponse>,
}

#[derive(Debug, Serialize)]
pub struct PartitionStatsResponse {
    pub name: String,
    pub kind: Option<PartitionKind>,
    pub entries: usize,
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn control(
    State(state): State<Arc<AppState>>,
    Json(message): Json<ControlMessage>,
) -> Result<Json<ControlReply>, StatusCode> {
    state.control.request(message).await.map(Json).map_err(|e| {
        warn!(error = %e, "Control request failed");
        StatusCode::SERVICE_UNAVAILABLE
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = &state.layer.store;
    let names = state.layer.lifecycle.names();

    let mut partitions = Vec::new();
    match store.partitions().await {
        Ok(existing) => {
            for name in existing {
                let entries = store.entry_count(&name).await.unwrap_or(0);
                let kind = PartitionKind::ALL
                    .into_iter()
                    .find(|kind| names.name(*kind) == name);
                partitions.push(PartitionStatsResponse {
                    name,
                    kind,
                    entries,
                });
            }
        }
        Err(e) => warn!(error = %e, "Failed to list partitions for health"),
    }

    Json(HealthResponse {
        status: "ok".to_string(),
        state: state.layer.lifecycle.state(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        partitions,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.layer.metrics.render() {
        Ok(text) => ([(CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn intercept(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let url = upstream_url(&state.upstream, &parts.uri);

    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            debug!(url = %url, error = %e, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let request = InterceptedRequest::from_parts(parts.method, url, parts.headers, body);
    match state.layer.router.handle(request).await {
        Some(response) => into_response(response),
        // The host page renders its own offline state.
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Target URL on the upstream origin for an intercepted request.
///
/// Only the path and query of `uri` are used, so neither an absolute-form
/// target nor a `//host/...` path can leave the upstream origin.
pub fn upstream_url(upstream: &Url, uri: &Uri) -> Url {
    let mut url = upstream.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

/// Replay a stored response; unparsable headers are dropped.
fn into_response(stored: StoredResponse) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(stored.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &stored.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %name, "Dropping unrepresentable header"),
        }
    }
    response
}
