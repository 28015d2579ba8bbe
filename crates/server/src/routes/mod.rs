pub mod audit;
pub mod groups;
pub mod keys;
pub mod mcp;
pub mod misc;
pub mod oauth;
pub mod webhooks;

use std::collections::HashMap;

use axum::Router;
use axum::http::{HeaderName, Method, header};
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_admin_key;
use crate::state::AppState;

/// Records an audit event with no structured metadata. Handlers that need
/// richer metadata call `state.audit.record(...)` directly.
pub(crate) async fn audit_log(state: &AppState, event_type: &str, actor: &str, message: &str) {
    state.audit.record(event_type, actor, message, HashMap::new()).await;
}

#[must_use]
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/ready", get(misc::ready))
        .route("/", get(misc::root))
        .route("/robots.txt", get(misc::robots))
        .route("/metrics", get(misc::metrics))
        .route("/openapi.json", get(misc::openapi))
        .route("/balance", get(misc::balance))
        .route("/oauth/register", post(oauth::register))
        .route("/oauth/authorize", post(oauth::authorize))
        .route("/oauth/token", post(oauth::token))
        .route("/oauth/revoke", post(oauth::revoke))
        .route("/.well-known/oauth-authorization-server", get(oauth::metadata));

    let mcp = Router::new().route("/mcp", get(mcp::handle_get).post(mcp::handle_post).delete(mcp::handle_delete));

    let admin = Router::new()
        .route("/keys", post(keys::create_key).get(keys::list_keys))
        .route("/keys/revoke", post(keys::revoke_key))
        .route("/keys/suspend", post(keys::suspend_key))
        .route("/keys/resume", post(keys::resume_key))
        .route("/keys/acl", post(keys::update_acl))
        .route("/keys/expiry", post(keys::update_expiry))
        .route("/keys/tags", post(keys::update_tags))
        .route("/keys/ip", post(keys::update_ip_allowlist))
        .route("/keys/alias", post(keys::add_alias).delete(keys::remove_alias))
        .route("/topup", post(keys::topup))
        .route("/limits", post(keys::set_spending_limit))
        .route("/keys/rate-limit", post(keys::update_rate_limit))
        .route("/keys/health", get(keys::key_health))
        .route("/keys/dashboard", get(keys::key_dashboard))
        .route("/groups", post(groups::create_group).get(groups::list_groups))
        .route("/groups/update", post(groups::update_group))
        .route("/groups/delete", post(groups::delete_group))
        .route("/groups/assign", post(groups::assign_group))
        .route("/groups/remove", post(groups::remove_group))
        .route("/webhooks/filters", post(webhooks::create_filter).get(webhooks::list_filters))
        .route("/webhooks/filters/update", post(webhooks::update_filter))
        .route("/webhooks/filters/delete", post(webhooks::delete_filter))
        .route("/webhooks/stats", get(webhooks::stats))
        .route("/oauth/bind", post(oauth::bind_key))
        .route("/audit", get(audit::list))
        .route("/audit/stats", get(audit::stats))
        .route("/audit/event", get(audit::get))
        .route("/audit/export", get(audit::export))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin_key));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, HeaderName::from_static("x-api-key"), HeaderName::from_static("mcp-session-id"), HeaderName::from_static("x-admin-key")])
        .expose_headers([HeaderName::from_static("mcp-session-id")]);

    Router::new()
        .merge(public)
        .merge(mcp)
        .merge(admin)
        .fallback(misc::root)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
