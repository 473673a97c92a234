//! HTTP JSON API for the executor.
//!
//! Endpoints:
//! - GET  /health             - Server status and active contract version
//! - POST /execute            - Evaluate one operation request
//! - GET  /contract/version   - Active contract version, also sent as `ETag`
//! - POST /contract/reload    - Reload the contract file now
//!
//! The caller's identity and persona are read from the `x-covenant-identity`
//! and `x-covenant-persona` headers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use covenant_eval::{Engine, ExecutionContext, Request};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::reload::ContractSource;

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

pub const IDENTITY_HEADER: &str = "x-covenant-identity";
pub const PERSONA_HEADER: &str = "x-covenant-persona";

/// Application state shared across request handlers.
pub struct AppState {
    pub engine: Engine,
    pub source: ContractSource,
    /// Deadline applied to every `/execute` invocation.
    pub invocation_timeout: Option<Duration>,
}

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/execute", post(handle_execute))
        .route("/contract/version", get(handle_contract_version))
        .route("/contract/reload", post(handle_reload))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

async fn handle_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let version = state.engine.store().version();
    let response = serde_json::json!({
        "status": "ok",
        "contract_loaded": version.is_some(),
        "contract_version": version,
        "ports": state.engine.ports().names(),
    });
    (StatusCode::OK, Json(response)).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// POST /execute
async fn handle_execute(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Request>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {}", rejection.body_text()),
            )
        }
    };

    let mut ctx = ExecutionContext::new();
    if let Some(identity) = header_str(&headers, IDENTITY_HEADER) {
        ctx = ctx.with_identity(identity);
    }
    if let Some(persona) = header_str(&headers, PERSONA_HEADER) {
        ctx = ctx.with_persona(persona);
    }
    if let Some(timeout) = state.invocation_timeout {
        ctx = ctx.with_timeout(timeout);
    }

    let response = state.engine.evaluate(request, &ctx).await;
    let status = StatusCode::from_u16(response.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}

/// GET /contract/version
async fn handle_contract_version(State(state): State<Arc<AppState>>) -> Response {
    let Some(version) = state.engine.store().version() else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "no contract loaded");
    };
    let mut response = (
        StatusCode::OK,
        Json(serde_json::json!({ "contract_version": version })),
    )
        .into_response();
    if let Ok(value) = format!("\"{}\"", version).parse() {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

/// POST /contract/reload
async fn handle_reload(State(state): State<Arc<AppState>>) -> Response {
    match state.source.refresh(state.engine.store(), true).await {
        Ok(status) => {
            let response = serde_json::json!({
                "status": status,
                "contract_version": state.engine.store().version(),
            });
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "manual contract reload failed");
            json_error(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string())
        }
    }
}
