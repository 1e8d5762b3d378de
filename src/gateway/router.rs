//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use super::AppState;
use super::pipeline;

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/audit-logs", get(audit_logs_handler))
        .route("/api/endpoints", get(endpoints_handler))
        .route("/api/mcp", get(mcp_document_handler))
        .route("/api/mcp/resources", get(mcp_resources_handler))
        .route("/api/mcp/prompts", get(mcp_prompts_handler))
        .route("/api/mcp/tools", get(mcp_tools_handler))
        .route("/proxy/{endpoint_id}", any(proxy_root_handler))
        .route("/proxy/{endpoint_id}/", any(proxy_root_handler))
        .route("/proxy/{endpoint_id}/{*path}", any(proxy_path_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `ANY /proxy/{endpoint_id}` - the endpoint's root resource
async fn proxy_root_handler(
    State(state): State<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
    request: Request,
) -> Response {
    pipeline::run(state, endpoint_id, String::new(), request).await
}

/// `ANY /proxy/{endpoint_id}/{*path}`
async fn proxy_path_handler(
    State(state): State<Arc<AppState>>,
    Path((endpoint_id, path)): Path<(String, String)>,
    request: Request,
) -> Response {
    pipeline::run(state, endpoint_id, path, request).await
}

/// `GET /health`
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": state.registry.len(),
        "auditRecords": state.audit.len(),
        "tokenVerifier": state.verifier.mode().as_str(),
    }))
}

/// `GET /api/audit-logs` - most recent window, oldest first
async fn audit_logs_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "total": state.audit.len(),
        "records": state.audit.recent(state.recent_window),
    }))
}

/// `GET /api/endpoints`
async fn endpoints_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "endpoints": state.registry.list() }))
}

/// `GET /api/mcp`
async fn mcp_document_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.discovery.public_view())
}

async fn mcp_resources_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    listing(&state.discovery.resources)
}

async fn mcp_prompts_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    listing(&state.discovery.prompts)
}

async fn mcp_tools_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    listing(&state.discovery.tools)
}

fn listing(items: &[Value]) -> Json<Value> {
    Json(Value::Array(items.to_vec()))
}
