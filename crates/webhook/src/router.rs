use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::emitter::{DeadLetterEntry, Emitter, EmitterStats};
use crate::error::WebhookError;
use crate::event::WebhookEvent;
use crate::rules::FilterRule;

/// Default cap on retries per delivery before it is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Routes usage and admin events to every matching filter rule's emitter,
/// plus an optional default emitter that receives every event regardless
/// of rule matches. Exactly one emitter exists per destination URL.
pub struct WebhookRouter {
    rules: DashMap<String, FilterRule>,
    emitters: DashMap<String, Arc<Emitter>>,
    default_url: std::sync::RwLock<Option<String>>,
    max_retries: u32,
}

impl WebhookRouter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
            emitters: DashMap::new(),
            default_url: std::sync::RwLock::new(None),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn set_default_url(&self, url: Option<String>) {
        *self.default_url.write().expect("default_url lock poisoned") = url;
    }

    fn emitter_for(&self, url: &str, secret: Option<String>) -> Arc<Emitter> {
        self.emitters
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Emitter::new(url, secret, self.max_retries)))
            .clone()
    }

    /// Adds or replaces a filter rule, lazily creating its emitter.
    pub fn add_rule(&self, rule: FilterRule) {
        self.emitter_for(&rule.url, rule.secret.clone());
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Removes a rule and destroys its emitter if no other rule (and no
    /// default URL) references the same destination any longer.
    pub fn delete_rule(&self, rule_id: &str) -> Result<(), WebhookError> {
        let (_, removed) = self
            .rules
            .remove(rule_id)
            .ok_or_else(|| WebhookError::RuleNotFound(rule_id.to_string()))?;
        let still_referenced = self.rules.iter().any(|r| r.url == removed.url)
            || self.default_url.read().expect("default_url lock poisoned").as_deref() == Some(removed.url.as_str());
        if !still_referenced {
            self.emitters.remove(&removed.url);
        }
        Ok(())
    }

    #[must_use]
    pub fn list_rules(&self) -> Vec<FilterRule> {
        self.rules.iter().map(|e| e.value().clone()).collect()
    }

    /// Enqueues `event` on every active rule that matches it, and on the
    /// default emitter (if configured) regardless of rule matches.
    pub async fn route(&self, event: WebhookEvent) {
        let mut targets: Vec<Arc<Emitter>> = self
            .rules
            .iter()
            .filter(|r| r.matches(&event))
            .map(|r| self.emitter_for(&r.url, r.secret.clone()))
            .collect();

        if let Some(default_url) = self.default_url.read().expect("default_url lock poisoned").clone() {
            targets.push(self.emitter_for(&default_url, None));
        }

        for emitter in targets {
            emitter.enqueue(event.clone()).await;
        }
    }

    /// Drives delivery for every emitter's due retries. Intended to be
    /// called from a periodic server-owned tick.
    pub async fn process_due_all(&self) {
        let now = Utc::now();
        let emitters: Vec<Arc<Emitter>> = self.emitters.iter().map(|e| e.value().clone()).collect();
        for emitter in emitters {
            emitter.process_due(now).await;
        }
    }

    pub async fn stats(&self, url: &str) -> Option<EmitterStats> {
        let emitter = self.emitters.get(url)?.clone();
        Some(emitter.stats().await)
    }

    pub async fn dead_letters(&self, url: &str) -> Option<Vec<DeadLetterEntry>> {
        let emitter = self.emitters.get(url)?.clone();
        Some(emitter.dead_letters().await)
    }
}

impl Default for WebhookRouter {
    fn default() -> Self {
        Self::new()
    }
}
