use std::collections::HashMap;

use chrono::{DateTime, Utc};
use paygate_core::pagination;
use serde::{Deserialize, Serialize};

/// A single audit entry: monotonic id, timestamp, type tag, actor, message,
/// and a metadata map for structured extras.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuditEvent {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    /// Dotted type tag, e.g. `gate.deny`, `key.created`, `admin.auth_failed`.
    pub event_type: String,
    pub actor: String,
    pub message: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Query parameters for [`crate::store::AuditStore::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<i64>,
}

impl AuditQuery {
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        pagination::clamp_limit(self.limit)
    }

    #[must_use]
    pub fn effective_offset(&self) -> u64 {
        pagination::clamp_offset(self.offset)
    }

    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_type.as_ref().is_none_or(|t| &event.event_type == t)
            && self.actor.as_ref().is_none_or(|a| &event.actor == a)
            && self.since.is_none_or(|s| event.timestamp >= s)
            && self.until.is_none_or(|u| event.timestamp <= u)
    }
}

/// A page of audit results.
#[derive(Debug, Clone)]
pub struct AuditPage {
    pub events: Vec<AuditEvent>,
    pub total: usize,
    pub offset: u64,
    pub limit: u32,
    pub has_more: bool,
}

/// Renders `events` as CSV: header `id,timestamp,type,actor,message`;
/// string fields are double-quote wrapped, inner quotes doubled.
#[must_use]
pub fn to_csv(events: &[AuditEvent]) -> String {
    let mut out = String::from("id,timestamp,type,actor,message\n");
    for event in events {
        out.push_str(&event.id.to_string());
        out.push(',');
        out.push_str(&quote(&event.timestamp.to_rfc3339()));
        out.push(',');
        out.push_str(&quote(&event.event_type));
        out.push(',');
        out.push_str(&quote(&event.actor));
        out.push(',');
        out.push_str(&quote(&event.message));
        out.push('\n');
    }
    out
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
