use serde::{Deserialize, Serialize};

use crate::event::WebhookEvent;

/// A webhook routing rule: event-type match (literal or `*`) and an
/// optional key-prefix filter, both of which must pass for the rule to
/// fire on a given event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: String,
    pub name: String,
    pub event_types: Vec<String>,
    pub url: String,
    pub secret: Option<String>,
    pub key_prefixes: Vec<String>,
    pub active: bool,
}

impl FilterRule {
    #[must_use]
    pub fn matches(&self, event: &WebhookEvent) -> bool {
        if !self.active {
            return false;
        }
        let type_matches = self
            .event_types
            .iter()
            .any(|t| t == "*" || t == &event.event_type);
        if !type_matches {
            return false;
        }
        if self.key_prefixes.is_empty() {
            return true;
        }
        event
            .key_id
            .as_ref()
            .is_some_and(|id| self.key_prefixes.iter().any(|p| id.starts_with(p.as_str())))
    }
}
