use chrono::{DateTime, Utc};
use dashmap::DashMap;
use paygate_core::generate_id;

/// Default cap on live sessions before the oldest-last-activity session is
/// evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 50_000;

/// Default idle expiry.
pub const DEFAULT_SESSION_TIMEOUT_MS: i64 = 30 * 60 * 1_000;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub key_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Tracks MCP sessions keyed by `Mcp-Session-Id`. Bounded by
/// [`DEFAULT_MAX_SESSIONS`], eviction by oldest last-activity; idle
/// sessions additionally expire after `timeout_ms`.
pub struct SessionManager {
    sessions: DashMap<String, Session>,
    max_sessions: usize,
    timeout_ms: i64,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn with_limits(max_sessions: usize, timeout_ms: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            timeout_ms,
        }
    }

    /// Creates a new session, evicting the oldest-last-activity session
    /// first if the cap would be exceeded.
    pub fn create(&self, key_id: Option<String>) -> Session {
        if self.sessions.len() >= self.max_sessions {
            self.evict_oldest();
        }
        let now = Utc::now();
        let session = Session {
            id: generate_id("pg_sess", 16),
            key_id,
            created_at: now,
            last_activity: now,
        };
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Looks up `id`, refreshing its last-activity timestamp. Returns
    /// `None` for an unknown or expired id (expired entries are evicted
    /// opportunistically).
    pub fn touch(&self, id: &str) -> Option<Session> {
        let now = Utc::now();
        let mut entry = self.sessions.get_mut(id)?;
        if (now - entry.last_activity).num_milliseconds() > self.timeout_ms {
            drop(entry);
            self.sessions.remove(id);
            return None;
        }
        entry.last_activity = now;
        Some(entry.clone())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    /// Destroys a session. `false` if it did not exist.
    pub fn destroy(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Removes every session whose idle time exceeds `timeout_ms`.
    pub fn expire_idle(&self) {
        let now = Utc::now();
        let timeout_ms = self.timeout_ms;
        self.sessions.retain(|_, s| (now - s.last_activity).num_milliseconds() <= timeout_ms);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|e| e.value().last_activity)
            .map(|e| e.key().clone());
        if let Some(id) = oldest {
            self.sessions.remove(&id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_touch_refreshes_activity() {
        let manager = SessionManager::new();
        let session = manager.create(Some("pg_k1".into()));
        let first_activity = session.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let touched = manager.touch(&session.id).unwrap();
        assert!(touched.last_activity >= first_activity);
    }

    #[test]
    fn unknown_id_returns_none() {
        let manager = SessionManager::new();
        assert!(manager.touch("pg_sess_missing").is_none());
    }

    #[test]
    fn destroy_removes_session() {
        let manager = SessionManager::new();
        let session = manager.create(None);
        assert!(manager.destroy(&session.id));
        assert!(!manager.destroy(&session.id));
    }

    #[test]
    fn eviction_removes_oldest_last_activity_session_at_cap() {
        let manager = SessionManager::with_limits(2, DEFAULT_SESSION_TIMEOUT_MS);
        let first = manager.create(None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let _second = manager.create(None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let _third = manager.create(None);

        assert_eq!(manager.len(), 2);
        assert!(manager.get(&first.id).is_none());
    }

    #[test]
    fn touch_evicts_expired_session() {
        let manager = SessionManager::with_limits(DEFAULT_MAX_SESSIONS, 0);
        let session = manager.create(None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(manager.touch(&session.id).is_none());
        assert!(manager.get(&session.id).is_none());
    }
}
