use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Rejects requests lacking a valid `X-Admin-Key` header, and throttles
/// per source IP via the admin rate limiter. Applied only to the admin
/// router.
pub async fn require_admin_key(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, request: Request, next: Next) -> Response {
    let Some(expected) = state.config.admin_key.as_deref() else {
        return (StatusCode::UNAUTHORIZED, "admin API disabled: no admin key configured").into_response();
    };

    let ip = addr.ip().to_string();
    let now = Utc::now();
    let decision = state.rate_limiter.check_admin(&ip, now);
    if !decision.allowed {
        return (StatusCode::TOO_MANY_REQUESTS, "admin rate limit exceeded").into_response();
    }

    let supplied = request.headers().get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    let authorized = supplied.is_some_and(|s| constant_time_eq(s, expected));

    if !authorized {
        let mut metadata = HashMap::new();
        metadata.insert("ip".to_string(), ip.clone());
        metadata.insert("path".to_string(), request.uri().path().to_string());
        state.audit.record("admin.auth_failed", "anonymous", "admin auth failed", metadata).await;
        return (StatusCode::UNAUTHORIZED, axum::Json(json!({ "error": "admin auth failed" }))).into_response();
    }

    state.rate_limiter.record_admin(&ip, now);
    next.run(request).await
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).unwrap_u8() == 1
}
