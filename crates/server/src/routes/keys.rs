use std::collections::HashMap;

use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use paygate_core::key::RateLimitOverride;
use paygate_core::quota::QuotaPolicy;
use paygate_core::{Credit, Key, PaygateError};
use paygate_store::{CreateKeyOptions, KeyFilter, KeyPage, KeyPatch, KeySort};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

use super::audit_log;

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    pub initial_credits: Credit,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub denied_tools: Vec<String>,
    #[serde(default)]
    pub pricing: HashMap<String, Credit>,
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub namespace: Option<String>,
    pub spending_limit: Option<Credit>,
    pub quota: Option<QuotaPolicy>,
    pub rate_limit: Option<RateLimitOverride>,
    pub group: Option<String>,
}

pub async fn create_key(State(state): State<AppState>, Json(req): Json<CreateKeyRequest>) -> Result<Json<Key>, ApiError> {
    let options = CreateKeyOptions {
        allowed_tools: req.allowed_tools,
        denied_tools: req.denied_tools,
        pricing: req.pricing,
        default_credits: None,
        ip_allowlist: req.ip_allowlist,
        tags: req.tags,
        expires_at: req.expires_at,
        namespace: req.namespace,
        spending_limit: req.spending_limit,
        quota: req.quota,
        rate_limit: req.rate_limit,
        group: req.group,
    };
    let key = state.key_store.create_key(&req.name, req.initial_credits, options).map_err(PaygateError::from)?;
    audit_log(&state, "key.created", &key.id, &format!("created key \"{}\"", key.name)).await;
    state
        .webhooks
        .route(paygate_webhook::WebhookEvent::new(
            "key.created",
            Some(paygate_core::ids::mask_identifier(&key.id)),
            serde_json::json!({ "name": key.name }),
        ))
        .await;
    Ok(Json(key))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListKeysQuery {
    pub namespace: Option<String>,
    pub group: Option<String>,
    pub active: Option<bool>,
    pub suspended: Option<bool>,
    pub expired: Option<bool>,
    pub name_prefix: Option<String>,
    pub min_credits: Option<Credit>,
    pub max_credits: Option<Credit>,
    pub sort: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<i64>,
}

pub async fn list_keys(State(state): State<AppState>, Query(query): Query<ListKeysQuery>) -> Json<KeyPageResponse> {
    let sort = match query.sort.as_deref() {
        Some("name") => KeySort::Name,
        Some("credits") => KeySort::Credits,
        _ => KeySort::CreatedAtDesc,
    };
    let filter = KeyFilter {
        namespace: query.namespace,
        group: query.group,
        active: query.active,
        suspended: query.suspended,
        expired: query.expired,
        name_prefix: query.name_prefix,
        min_credits: query.min_credits,
        max_credits: query.max_credits,
        sort,
    };
    let page: KeyPage = state.key_store.list(&filter, query.limit, query.offset);
    Json(KeyPageResponse {
        keys: page.keys,
        total: page.total,
        offset: page.offset,
        limit: page.limit,
        has_more: page.has_more,
    })
}

#[derive(Debug, serde::Serialize)]
pub struct KeyPageResponse {
    pub keys: Vec<Key>,
    pub total: usize,
    pub offset: u64,
    pub limit: u32,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct KeyIdRequest {
    pub key: String,
}

pub async fn revoke_key(State(state): State<AppState>, Json(req): Json<KeyIdRequest>) -> Result<(), ApiError> {
    state.key_store.revoke(&req.key).map_err(PaygateError::from)?;
    audit_log(&state, "key.revoked", &req.key, "key revoked").await;
    Ok(())
}

pub async fn suspend_key(State(state): State<AppState>, Json(req): Json<KeyIdRequest>) -> Result<(), ApiError> {
    state.key_store.suspend(&req.key).map_err(PaygateError::from)?;
    audit_log(&state, "key.suspended", &req.key, "key suspended").await;
    Ok(())
}

pub async fn resume_key(State(state): State<AppState>, Json(req): Json<KeyIdRequest>) -> Result<(), ApiError> {
    state.key_store.resume(&req.key).map_err(PaygateError::from)?;
    audit_log(&state, "key.resumed", &req.key, "key resumed").await;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct AclRequest {
    pub key: String,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub denied_tools: Option<Vec<String>>,
    #[serde(default)]
    pub pricing: Option<HashMap<String, Credit>>,
}

pub async fn update_acl(State(state): State<AppState>, Json(req): Json<AclRequest>) -> Result<Json<Key>, ApiError> {
    let patch = KeyPatch {
        allowed_tools: req.allowed_tools,
        denied_tools: req.denied_tools,
        pricing: req.pricing,
        ..Default::default()
    };
    let key = state.key_store.update_meta(&req.key, patch).map_err(PaygateError::from)?;
    audit_log(&state, "key.acl_updated", &req.key, "ACL updated").await;
    Ok(Json(key))
}

#[derive(Debug, Deserialize)]
pub struct ExpiryRequest {
    pub key: String,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn update_expiry(State(state): State<AppState>, Json(req): Json<ExpiryRequest>) -> Result<Json<Key>, ApiError> {
    let patch = KeyPatch {
        expires_at: Some(req.expires_at),
        ..Default::default()
    };
    let key = state.key_store.update_meta(&req.key, patch).map_err(PaygateError::from)?;
    Ok(Json(key))
}

#[derive(Debug, Deserialize)]
pub struct TagsRequest {
    pub key: String,
    pub tags: HashMap<String, String>,
}

pub async fn update_tags(State(state): State<AppState>, Json(req): Json<TagsRequest>) -> Result<Json<Key>, ApiError> {
    let patch = KeyPatch {
        tags: Some(req.tags),
        ..Default::default()
    };
    let key = state.key_store.update_meta(&req.key, patch).map_err(PaygateError::from)?;
    Ok(Json(key))
}

#[derive(Debug, Deserialize)]
pub struct IpAllowlistRequest {
    pub key: String,
    pub ip_allowlist: Vec<String>,
}

pub async fn update_ip_allowlist(State(state): State<AppState>, Json(req): Json<IpAllowlistRequest>) -> Result<Json<Key>, ApiError> {
    let patch = KeyPatch {
        ip_allowlist: Some(req.ip_allowlist),
        ..Default::default()
    };
    let key = state.key_store.update_meta(&req.key, patch).map_err(PaygateError::from)?;
    Ok(Json(key))
}

#[derive(Debug, Deserialize)]
pub struct AliasRequest {
    pub key: String,
    pub alias: String,
}

pub async fn add_alias(State(state): State<AppState>, Json(req): Json<AliasRequest>) -> Result<(), ApiError> {
    state.key_store.register_alias(&req.key, &req.alias).map_err(PaygateError::from)?;
    Ok(())
}

pub async fn remove_alias(State(state): State<AppState>, Json(req): Json<AliasRequest>) -> Result<(), ApiError> {
    state.key_store.remove_alias(&req.key, &req.alias).map_err(PaygateError::from)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct TopupRequest {
    pub key: String,
    pub amount: Credit,
}

pub async fn topup(State(state): State<AppState>, Json(req): Json<TopupRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let balance = state.key_store.topup(&req.key, req.amount).map_err(PaygateError::from)?;
    audit_log(&state, "key.topup", &req.key, &format!("topped up {} credits", req.amount)).await;
    Ok(Json(serde_json::json!({ "balance": balance })))
}

#[derive(Debug, Deserialize)]
pub struct SpendingLimitRequest {
    pub key: String,
    pub spending_limit: Option<Credit>,
}

pub async fn set_spending_limit(State(state): State<AppState>, Json(req): Json<SpendingLimitRequest>) -> Result<Json<Key>, ApiError> {
    let patch = KeyPatch {
        spending_limit: req.spending_limit,
        ..Default::default()
    };
    let key = state.key_store.update_meta(&req.key, patch).map_err(PaygateError::from)?;
    Ok(Json(key))
}

#[derive(Debug, Deserialize)]
pub struct RateLimitRequest {
    pub key: String,
    pub rate_limit: Option<RateLimitOverride>,
}

pub async fn update_rate_limit(State(state): State<AppState>, Json(req): Json<RateLimitRequest>) -> Result<Json<Key>, ApiError> {
    let patch = KeyPatch {
        rate_limit: Some(req.rate_limit),
        ..Default::default()
    };
    let key = state.key_store.update_meta(&req.key, patch).map_err(PaygateError::from)?;
    audit_log(&state, "key.rate_limit_updated", &req.key, "rate limit updated").await;
    Ok(Json(key))
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

pub async fn key_health(State(state): State<AppState>, Query(query): Query<KeyQuery>) -> Result<Json<serde_json::Value>, ApiError> {
    let key = state.key_store.get_key(&query.key).ok_or_else(|| PaygateError::NotFound(format!("key {}", query.key)))?;
    Ok(Json(serde_json::json!({
        "status": key.status,
        "active": key.active,
        "balance": key.balance,
        "spent": key.spent,
        "calls": key.calls,
    })))
}

pub async fn key_dashboard(State(state): State<AppState>, Query(query): Query<KeyQuery>) -> Result<Json<Key>, ApiError> {
    let key = state.key_store.get_key(&query.key).ok_or_else(|| PaygateError::NotFound(format!("key {}", query.key)))?;
    Ok(Json(key))
}
