//! Axum route handlers for the scl HTTP server.
//!
//! # Routes
//!
//! - `GET  /health`       - Returns `{"status": "ok", "version": .., "service": "scl"}`
//! - `GET  /capabilities` - Stored capabilities as `{name, type, description}`
//! - `GET  /metrics`      - Cumulative retrieval and invocation counters
//! - `POST /chat`         - Runs one turn of the tool-calling protocol

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chat::{ChatRequest, ConversationLoop};
use crate::utilities::errors::SclError;

/// Upper bound on capabilities returned by `GET /capabilities`.
const LIST_LIMIT: usize = 100;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ConversationLoop>,
}

impl AppState {
    pub fn new(chat: ConversationLoop) -> Self {
        Self {
            chat: Arc::new(chat),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/capabilities", get(list_capabilities_handler))
        .route("/metrics", get(metrics_handler))
        .route("/chat", post(chat_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

/// Status code for a failed turn.
fn status_for(err: &SclError) -> StatusCode {
    match err {
        SclError::Invocation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SclError::InvalidCapabilityType { .. } | SclError::Config(_) => StatusCode::BAD_REQUEST,
        SclError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
        SclError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: SclError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("Chat turn failed: {}", err);
    } else {
        tracing::warn!("Chat turn rejected: {}", err);
    }
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

/// GET /health - liveness check.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "scl",
    }))
}

/// GET /capabilities - what the store currently holds.
async fn list_capabilities_handler(State(state): State<AppState>) -> impl IntoResponse {
    let capabilities = state.chat.registry().store().list(LIST_LIMIT).await;
    let body: Vec<Value> = capabilities
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name(),
                "type": c.kind().as_str(),
                "description": c.description(),
            })
        })
        .collect();
    Json(Value::Array(body))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.chat.registry().metrics())
}

/// POST /chat - one user turn.
///
/// Request:  `{ "message": str, "tool_names": [str]?, "hint": {limit?, min_similarity?}? }`
/// Response: `{ "content": str, "merge": MergeReport, "tool_calls": [ToolExecution] }`
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "message must not be empty" })),
        ));
    }

    let outcome = state.chat.run(request).await.map_err(api_error)?;
    tracing::info!(
        conversation = %outcome.state.id(),
        tool_calls = outcome.executions.len(),
        "Chat turn complete"
    );
    Ok(Json(serde_json::json!({
        "content": outcome.content,
        "merge": outcome.merge_report,
        "tool_calls": outcome.executions,
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
