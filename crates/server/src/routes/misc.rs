use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn ready(State(state): State<AppState>) -> Response {
    if state.is_under_maintenance() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "maintenance" }))).into_response();
    }
    (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "name": "paygate", "description": "payment-gated reverse proxy" }))
}

pub async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /\n"
}

pub async fn metrics(State(state): State<AppState>) -> String {
    let sessions = state.proxy.sessions().len();
    let keys = state.key_store.list(&paygate_store::KeyFilter::default(), Some(paygate_core::pagination::MAX_LIST_LIMIT), None).total;
    format!(
        "# HELP paygate_sessions_active Active MCP sessions\n\
         # TYPE paygate_sessions_active gauge\n\
         paygate_sessions_active {sessions}\n\
         # HELP paygate_keys_total Known keys\n\
         # TYPE paygate_keys_total gauge\n\
         paygate_keys_total {keys}\n"
    )
}

pub async fn balance(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| paygate_core::PaygateError::Auth("X-Api-Key header required".into()))?;
    let key = state
        .key_store
        .get_key(api_key)
        .ok_or_else(|| paygate_core::PaygateError::Auth("unknown API key".into()))?;
    Ok(Json(json!({
        "balance": key.balance,
        "spent": key.spent,
        "calls": key.calls,
        "status": key.status,
    })))
}

pub async fn openapi() -> Json<serde_json::Value> {
    Json(json!({
        "openapi": "3.0.3",
        "info": { "title": "paygate", "version": env!("CARGO_PKG_VERSION") },
        "paths": {},
    }))
}
