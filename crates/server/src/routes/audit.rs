use axum::Json;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use paygate_audit::{AuditQuery, to_csv};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct AuditListQuery {
    pub event_type: Option<String>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<i64>,
}

impl From<AuditListQuery> for AuditQuery {
    fn from(q: AuditListQuery) -> Self {
        Self {
            event_type: q.event_type,
            actor: q.actor,
            since: q.since,
            until: q.until,
            limit: q.limit,
            offset: q.offset,
        }
    }
}

pub async fn list(State(state): State<AppState>, Query(query): Query<AuditListQuery>) -> Json<serde_json::Value> {
    let page = state.audit.query(&query.into()).await;
    Json(serde_json::json!({
        "events": page.events,
        "total": page.total,
        "offset": page.offset,
        "limit": page.limit,
        "hasMore": page.has_more,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
    pub event_type: Option<String>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

pub async fn export(State(state): State<AppState>, Query(query): Query<ExportQuery>) -> Response {
    let audit_query = AuditQuery {
        event_type: query.event_type,
        actor: query.actor,
        since: query.since,
        until: query.until,
        limit: Some(paygate_core::pagination::MAX_LIST_LIMIT),
        offset: None,
    };
    let page = state.audit.query(&audit_query).await;
    match query.format.as_deref() {
        Some("json") => Json(page.events).into_response(),
        _ => ([(header::CONTENT_TYPE, "text/csv")], to_csv(&page.events)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditIdQuery {
    pub id: u64,
}

pub async fn get(State(state): State<AppState>, Query(query): Query<AuditIdQuery>) -> Result<Json<paygate_audit::AuditEvent>, ApiError> {
    state
        .audit
        .get(query.id)
        .map(Json)
        .ok_or_else(|| paygate_core::PaygateError::NotFound(format!("audit event {}", query.id)).into())
}

pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let page = state.audit.query(&AuditQuery {
        limit: Some(paygate_core::pagination::MAX_LIST_LIMIT),
        ..Default::default()
    }).await;
    let mut by_type: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for event in &page.events {
        *by_type.entry(event.event_type.clone()).or_insert(0) += 1;
    }
    Json(serde_json::json!({ "total": page.total, "byType": by_type }))
}
