use axum::Json;
use axum::extract::{Query, State};
use paygate_core::PaygateError;
use paygate_core::ids::generate_id;
use paygate_webhook::FilterRule;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

use super::audit_log;

#[derive(Debug, Deserialize)]
pub struct CreateFilterRequest {
    pub name: String,
    pub event_types: Vec<String>,
    pub url: String,
    pub secret: Option<String>,
    #[serde(default)]
    pub key_prefixes: Vec<String>,
}

pub async fn create_filter(State(state): State<AppState>, Json(req): Json<CreateFilterRequest>) -> Json<FilterRule> {
    let rule = FilterRule {
        id: generate_id("pg_rule", 12),
        name: req.name,
        event_types: req.event_types,
        url: req.url,
        secret: req.secret,
        key_prefixes: req.key_prefixes,
        active: true,
    };
    state.webhooks.add_rule(rule.clone());
    audit_log(&state, "webhook.filter_created", "admin", &format!("created filter \"{}\"", rule.name)).await;
    Json(rule)
}

pub async fn update_filter(State(state): State<AppState>, Json(rule): Json<FilterRule>) -> Json<FilterRule> {
    state.webhooks.add_rule(rule.clone());
    Json(rule)
}

#[derive(Debug, Deserialize)]
pub struct FilterIdRequest {
    pub id: String,
}

pub async fn delete_filter(State(state): State<AppState>, Json(req): Json<FilterIdRequest>) -> Result<(), ApiError> {
    state.webhooks.delete_rule(&req.id).map_err(PaygateError::from)?;
    audit_log(&state, "webhook.filter_deleted", "admin", &format!("deleted filter \"{}\"", req.id)).await;
    Ok(())
}

pub async fn list_filters(State(state): State<AppState>) -> Json<Vec<FilterRule>> {
    Json(state.webhooks.list_rules())
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub url: String,
}

pub async fn stats(State(state): State<AppState>, Query(query): Query<StatsQuery>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state
        .webhooks
        .stats(&query.url)
        .await
        .ok_or_else(|| PaygateError::NotFound(format!("emitter for {}", query.url)))?;
    let dead_letters = state.webhooks.dead_letters(&query.url).await.unwrap_or_default();
    Ok(Json(serde_json::json!({ "stats": stats, "deadLetters": dead_letters })))
}
