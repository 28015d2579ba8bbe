use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A usage or admin event routed through [`crate::router::WebhookRouter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    /// Masked key identifier, when the event concerns one key.
    pub key_id: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, key_id: Option<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            key_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}
