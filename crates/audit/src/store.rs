use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::record::{AuditEvent, AuditPage, AuditQuery};

/// Default retention cap: oldest events are evicted first once exceeded.
pub const DEFAULT_MAX_EVENTS: usize = 100_000;

/// Default retention age; events older than this are pruned opportunistically.
pub const DEFAULT_MAX_AGE: chrono::Duration = chrono::Duration::days(30);

/// Append-only audit event sink. Implementations must be safe under
/// concurrent use; the in-memory implementation is the only one this crate
/// ships (external stores are out of core scope).
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record(&self, event_type: &str, actor: &str, message: &str, metadata: HashMap<String, String>) -> AuditEvent;
    async fn query(&self, query: &AuditQuery) -> AuditPage;
    async fn get(&self, id: u64) -> Option<AuditEvent>;
}

/// Ring-buffer-backed audit log bounded by both count and age.
pub struct InMemoryAuditStore {
    events: RwLock<VecDeque<AuditEvent>>,
    next_id: AtomicU64,
    max_events: usize,
    max_age: chrono::Duration,
}

impl InMemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            max_events: DEFAULT_MAX_EVENTS,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    #[must_use]
    pub fn with_limits(max_events: usize, max_age: chrono::Duration) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            max_events,
            max_age,
        }
    }

    fn prune(events: &mut VecDeque<AuditEvent>, max_events: usize, max_age: chrono::Duration, now: DateTime<Utc>) {
        while events.len() > max_events {
            events.pop_front();
        }
        while events.front().is_some_and(|e| now - e.timestamp > max_age) {
            events.pop_front();
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn record(
        &self,
        event_type: &str,
        actor: &str,
        message: &str,
        metadata: HashMap<String, String>,
    ) -> AuditEvent {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let event = AuditEvent {
            id,
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            message: message.to_string(),
            metadata,
        };
        let mut events = self.events.write().await;
        events.push_back(event.clone());
        Self::prune(&mut events, self.max_events, self.max_age, event.timestamp);
        event
    }

    async fn query(&self, query: &AuditQuery) -> AuditPage {
        let events = self.events.read().await;
        let mut matched: Vec<AuditEvent> = events.iter().filter(|e| query.matches(e)).cloned().collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matched.len();
        let limit = query.effective_limit();
        let offset = query.effective_offset();
        let page: Vec<AuditEvent> = matched.into_iter().skip(offset as usize).take(limit as usize).collect();
        let has_more = offset + u64::from(limit) < total as u64;

        AuditPage {
            events: page,
            total,
            offset,
            limit,
            has_more,
        }
    }

    async fn get(&self, id: u64) -> Option<AuditEvent> {
        self.events.read().await.iter().find(|e| e.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_assigns_monotonic_ids() {
        let store = InMemoryAuditStore::new();
        let e1 = store.record("key.created", "admin", "created k1", HashMap::new()).await;
        let e2 = store.record("key.created", "admin", "created k2", HashMap::new()).await;
        assert_eq!(e1.id, 1);
        assert_eq!(e2.id, 2);
    }

    #[tokio::test]
    async fn query_filters_and_paginates() {
        let store = InMemoryAuditStore::new();
        for i in 0..5 {
            store
                .record("key.created", "admin", &format!("k{i}"), HashMap::new())
                .await;
        }
        let page = store
            .query(&AuditQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await;
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.total, 5);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn oldest_evicted_first_when_over_count_cap() {
        let store = InMemoryAuditStore::with_limits(3, chrono::Duration::days(30));
        for i in 0..5 {
            store.record("usage", "k1", &format!("call {i}"), HashMap::new()).await;
        }
        let page = store.query(&AuditQuery::default()).await;
        assert_eq!(page.total, 3);
        assert!(store.get(1).await.is_none(), "oldest event was evicted");
        assert!(store.get(5).await.is_some());
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_id() {
        let store = InMemoryAuditStore::new();
        assert!(store.get(999).await.is_none());
    }
}
