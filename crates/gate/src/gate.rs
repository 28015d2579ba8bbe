use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use paygate_audit::AuditStore;
use paygate_core::acl::EffectivePolicy;
use paygate_core::quota::QuotaPolicy;
use paygate_core::{Credit, ids::mask_identifier};
use paygate_ratelimit::{QuotaDecision, QuotaMeter, RateLimitRule, RateLimiter};
use paygate_store::KeyStore;
use tokio::sync::Mutex;

use crate::decision::Decision;

/// Reasons named in the admission contract. Rendered as their stable
/// snake_case labels when attached to a [`Decision`].
mod reason {
    pub const UNKNOWN_KEY: &str = "unknown_key";
    pub const REVOKED: &str = "revoked";
    pub const KEY_SUSPENDED: &str = "key_suspended";
    pub const KEY_EXPIRED: &str = "key_expired";
    pub const IP_NOT_ALLOWED: &str = "ip_not_allowed";
    pub const TOOL_NOT_ALLOWED: &str = "tool_not_allowed";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const SPENDING_LIMIT: &str = "spending_limit";
    pub const INSUFFICIENT_CREDITS: &str = "insufficient_credits";
}

/// Composes [`KeyStore`], [`RateLimiter`], and [`QuotaMeter`] into the
/// single atomic admission call described by the proxy's gate contract.
pub struct Gate {
    key_store: Arc<KeyStore>,
    rate_limiter: Arc<RateLimiter>,
    quota_meter: Arc<QuotaMeter>,
    audit: Arc<dyn AuditStore>,
    /// One mutex per key, created lazily, serializing `evaluate` calls so
    /// steps 2-11 behave as a single atomic admission per key.
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Price charged when no override is configured anywhere.
    global_default_credits: Credit,
    /// Process-wide quota counted across every key, independent of any
    /// per-key or per-group quota. Unset axes are unbounded.
    global_quota: QuotaPolicy,
    /// When set, `evaluate` always returns `allow` after running every
    /// check, without debiting. Used for dry-run audits.
    shadow_mode: AtomicBool,
}

impl Gate {
    #[must_use]
    pub fn new(
        key_store: Arc<KeyStore>,
        rate_limiter: Arc<RateLimiter>,
        quota_meter: Arc<QuotaMeter>,
        audit: Arc<dyn AuditStore>,
        global_default_credits: Credit,
    ) -> Self {
        Self::with_global_quota(key_store, rate_limiter, quota_meter, audit, global_default_credits, QuotaPolicy::default())
    }

    /// As [`Self::new`], with an explicit process-wide quota policy.
    #[must_use]
    pub fn with_global_quota(
        key_store: Arc<KeyStore>,
        rate_limiter: Arc<RateLimiter>,
        quota_meter: Arc<QuotaMeter>,
        audit: Arc<dyn AuditStore>,
        global_default_credits: Credit,
        global_quota: QuotaPolicy,
    ) -> Self {
        Self {
            key_store,
            rate_limiter,
            quota_meter,
            audit,
            locks: DashMap::new(),
            global_default_credits,
            global_quota,
            shadow_mode: AtomicBool::new(false),
        }
    }

    pub fn set_shadow_mode(&self, enabled: bool) {
        self.shadow_mode.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn shadow_mode(&self) -> bool {
        self.shadow_mode.load(Ordering::Relaxed)
    }

    fn lock_for(&self, key_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs the atomic admission sequence for `key_id` calling `tool`
    /// (`"*"` for non-`tools/call` requests). `context_ip` is the caller's
    /// address, checked against the effective IP allowlist when set.
    pub async fn evaluate(&self, key_id: &str, tool: &str, context_ip: Option<IpAddr>) -> Decision {
        let lock = self.lock_for(key_id);
        let _guard = lock.lock().await;
        self.evaluate_locked(key_id, tool, context_ip)
    }

    fn evaluate_locked(&self, key_id: &str, tool: &str, context_ip: Option<IpAddr>) -> Decision {
        let now = Utc::now();

        let Some(key) = self.key_store.get_key(key_id) else {
            return Decision::deny(reason::UNKNOWN_KEY);
        };
        if !key.active {
            return Decision::deny(reason::REVOKED);
        }
        match key.status {
            paygate_core::key::KeyStatus::Revoked => return Decision::deny(reason::REVOKED),
            paygate_core::key::KeyStatus::Suspended => return Decision::deny(reason::KEY_SUSPENDED),
            paygate_core::key::KeyStatus::Expired => return Decision::deny(reason::KEY_EXPIRED),
            paygate_core::key::KeyStatus::Active => {}
        }

        let group = key.group.as_deref().and_then(|g| self.key_store.get_group(g));
        let policy = EffectivePolicy::resolve(&key, group.as_ref());

        if let Some(ip) = context_ip
            && !policy.ip_allowed(ip)
        {
            return Decision::deny(reason::IP_NOT_ALLOWED);
        }

        let credits_charged = policy.price_for(tool, self.global_default_credits);

        if !policy.tool_allowed(tool) {
            return Decision::deny(reason::TOOL_NOT_ALLOWED);
        }

        let rate_limit_override = key.rate_limit.as_ref().map(|o| RateLimitRule::new(o.limit, o.window_ms));

        if !self.rate_limiter.check_call(key_id, tool, now, rate_limit_override).allowed {
            return Decision::deny(reason::RATE_LIMITED);
        }

        if let QuotaDecision::Denied { axis } =
            self.quota_meter
                .check(key_id, policy.quota.as_ref(), self.global_quota_policy(), credits_charged, now)
        {
            return Decision::deny(format!("quota_exceeded:{}", axis.label()));
        }

        if let Some(limit) = policy.spending_limit
            && limit != 0
            && key.spent + credits_charged > limit
        {
            return Decision::deny(reason::SPENDING_LIMIT);
        }

        if key.balance < credits_charged {
            return Decision::deny(reason::INSUFFICIENT_CREDITS);
        }

        if self.shadow_mode() {
            return Decision::allow(credits_charged, false);
        }

        if let Err(err) = self.key_store.debit(key_id, credits_charged) {
            tracing::warn!(key_id, error = %err, "debit failed after admission checks passed");
            return Decision::deny(reason::INSUFFICIENT_CREDITS);
        }
        self.rate_limiter.record_call(key_id, tool, now, rate_limit_override);
        self.quota_meter.commit(key_id, credits_charged, now);

        Decision::allow(credits_charged, true)
    }

    fn global_quota_policy(&self) -> Option<&QuotaPolicy> {
        Some(&self.global_quota)
    }

    /// Refunds `amount` to `key_id`, undoing a prior debit. Never exceeds
    /// the original charge; the caller is responsible for that invariant.
    /// Emits a `gate.refund` audit event.
    pub async fn refund(&self, key_id: &str, amount: Credit, reason: &str) -> Result<(), paygate_store::KeyStoreError> {
        let lock = self.lock_for(key_id);
        let _guard = lock.lock().await;
        self.key_store.refund(key_id, amount)?;
        let mut metadata = HashMap::new();
        metadata.insert("amount".to_string(), amount.to_string());
        metadata.insert("reason".to_string(), reason.to_string());
        self.audit
            .record("gate.refund", &mask_identifier(key_id), "refund applied", metadata)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use paygate_audit::InMemoryAuditStore;
    use paygate_core::group::Group;
    use paygate_store::key_store::CreateKeyOptions;

    use super::*;

    fn test_gate() -> (Gate, Arc<KeyStore>) {
        let key_store = Arc::new(KeyStore::new());
        let rate_limiter = Arc::new(RateLimiter::default());
        let quota_meter = Arc::new(QuotaMeter::new());
        let audit: Arc<dyn AuditStore> = Arc::new(InMemoryAuditStore::new());
        let gate = Gate::new(key_store.clone(), rate_limiter, quota_meter, audit, 1);
        (gate, key_store)
    }

    #[tokio::test]
    async fn unknown_key_is_denied() {
        let (gate, _store) = test_gate();
        let decision = gate.evaluate("pg_missing", "tool_a", None).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("unknown_key"));
    }

    #[tokio::test]
    async fn suspended_key_is_denied() {
        let (gate, store) = test_gate();
        let key = store.create_key("k", 100, CreateKeyOptions::default()).unwrap();
        store.suspend(&key.id).unwrap();
        let decision = gate.evaluate(&key.id, "tool_a", None).await;
        assert_eq!(decision.reason.as_deref(), Some("key_suspended"));
    }

    #[tokio::test]
    async fn successful_call_debits_balance_and_increments_calls() {
        let (gate, store) = test_gate();
        let key = store.create_key("k", 100, CreateKeyOptions::default()).unwrap();
        let decision = gate.evaluate(&key.id, "tool_a", None).await;
        assert!(decision.allowed);
        assert_eq!(decision.credits_charged, 1);
        assert!(decision.debit_applied);
        let updated = store.get_key(&key.id).unwrap();
        assert_eq!(updated.balance, 99);
        assert_eq!(updated.calls, 1);
    }

    #[tokio::test]
    async fn wildcard_request_charges_nothing() {
        let (gate, store) = test_gate();
        let key = store.create_key("k", 5, CreateKeyOptions::default()).unwrap();
        let decision = gate.evaluate(&key.id, "*", None).await;
        assert!(decision.allowed);
        assert_eq!(decision.credits_charged, 0);
    }

    #[tokio::test]
    async fn insufficient_balance_is_denied() {
        let (gate, store) = test_gate();
        let key = store.create_key("k", 0, CreateKeyOptions::default()).unwrap();
        let decision = gate.evaluate(&key.id, "tool_a", None).await;
        assert_eq!(decision.reason.as_deref(), Some("insufficient_credits"));
    }

    #[tokio::test]
    async fn tool_not_in_allow_list_is_denied() {
        let (gate, store) = test_gate();
        let key = store
            .create_key(
                "k",
                100,
                CreateKeyOptions {
                    allowed_tools: vec!["tool_a".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        let decision = gate.evaluate(&key.id, "tool_b", None).await;
        assert_eq!(decision.reason.as_deref(), Some("tool_not_allowed"));
    }

    #[tokio::test]
    async fn per_key_rate_limit_override_is_enforced() {
        let (gate, store) = test_gate();
        let key = store
            .create_key(
                "k",
                100,
                CreateKeyOptions {
                    rate_limit: Some(paygate_core::key::RateLimitOverride { limit: 1, window_ms: 60_000 }),
                    ..Default::default()
                },
            )
            .unwrap();
        let first = gate.evaluate(&key.id, "tool_a", None).await;
        assert!(first.allowed);
        let second = gate.evaluate(&key.id, "tool_a", None).await;
        assert_eq!(second.reason.as_deref(), Some("rate_limited"));
    }

    #[tokio::test]
    async fn ip_outside_allowlist_is_denied() {
        let (gate, store) = test_gate();
        let key = store
            .create_key(
                "k",
                100,
                CreateKeyOptions {
                    ip_allowlist: vec!["10.0.0.0/24".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        let decision = gate.evaluate(&key.id, "tool_a", Some("8.8.8.8".parse().unwrap())).await;
        assert_eq!(decision.reason.as_deref(), Some("ip_not_allowed"));
    }

    #[tokio::test]
    async fn spending_limit_denies_before_debit() {
        let (gate, store) = test_gate();
        let key = store
            .create_key(
                "k",
                100,
                CreateKeyOptions {
                    spending_limit: Some(1),
                    default_credits: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        let decision = gate.evaluate(&key.id, "tool_a", None).await;
        assert_eq!(decision.reason.as_deref(), Some("spending_limit"));
    }

    #[tokio::test]
    async fn spending_limit_of_zero_is_unbounded() {
        let (gate, store) = test_gate();
        let key = store
            .create_key(
                "k",
                100,
                CreateKeyOptions {
                    spending_limit: Some(0),
                    default_credits: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        let decision = gate.evaluate(&key.id, "tool_a", None).await;
        assert!(decision.allowed);
        assert_eq!(decision.credits_charged, 5);
    }

    #[tokio::test]
    async fn shadow_mode_allows_without_debiting() {
        let (gate, store) = test_gate();
        gate.set_shadow_mode(true);
        let key = store.create_key("k", 0, CreateKeyOptions::default()).unwrap();
        let decision = gate.evaluate(&key.id, "tool_a", None).await;
        assert!(decision.allowed);
        assert!(!decision.debit_applied);
        let updated = store.get_key(&key.id).unwrap();
        assert_eq!(updated.balance, 0);
    }

    #[tokio::test]
    async fn refund_restores_balance_and_spent() {
        let (gate, store) = test_gate();
        let key = store.create_key("k", 100, CreateKeyOptions::default()).unwrap();
        gate.evaluate(&key.id, "tool_a", None).await;
        gate.refund(&key.id, 1, "upstream_failure").await.unwrap();
        let updated = store.get_key(&key.id).unwrap();
        assert_eq!(updated.balance, 100);
        assert_eq!(updated.spent, 0);
    }

    #[tokio::test]
    async fn group_policy_applies_when_key_has_none() {
        let (gate, store) = test_gate();
        let mut group = Group::new("g1");
        group.allowed_tools = vec!["tool_a".into()];
        store
            .create_group(group)
            .expect("group created");
        let key = store
            .create_key(
                "k",
                100,
                CreateKeyOptions {
                    group: Some("g1".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let decision = gate.evaluate(&key.id, "tool_b", None).await;
        assert_eq!(decision.reason.as_deref(), Some("tool_not_allowed"));
    }

    #[tokio::test]
    async fn global_quota_denies_once_any_key_exhausts_it() {
        let key_store = Arc::new(KeyStore::new());
        let rate_limiter = Arc::new(RateLimiter::default());
        let quota_meter = Arc::new(QuotaMeter::new());
        let audit: Arc<dyn AuditStore> = Arc::new(InMemoryAuditStore::new());
        let global_quota = QuotaPolicy {
            daily_calls: Some(1),
            ..Default::default()
        };
        let gate = Gate::with_global_quota(key_store.clone(), rate_limiter, quota_meter, audit, 1, global_quota);

        let first = key_store.create_key("k1", 100, CreateKeyOptions::default()).unwrap();
        let second = key_store.create_key("k2", 100, CreateKeyOptions::default()).unwrap();

        let decision = gate.evaluate(&first.id, "tool_a", None).await;
        assert!(decision.allowed);

        let decision = gate.evaluate(&second.id, "tool_a", None).await;
        assert_eq!(decision.reason.as_deref(), Some("quota_exceeded:daily_calls"));
    }
}
