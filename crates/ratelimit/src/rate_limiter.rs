use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::sliding_window::{Decision, SlidingWindowLimiter};

/// A rate-limit rule: `limit` calls per `window_ms`. `active = false`
/// disables the rule entirely (it is skipped during resolution).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window_ms: u64,
    pub active: bool,
}

impl RateLimitRule {
    #[must_use]
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            active: true,
        }
    }
}

/// Process-wide default used when neither a tool-specific nor a `*` rule
/// applies.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterDefaults {
    pub global: RateLimitRule,
    pub per_key: RateLimitRule,
    pub admin: RateLimitRule,
    pub session_creation: RateLimitRule,
}

impl Default for RateLimiterDefaults {
    fn default() -> Self {
        Self {
            global: RateLimitRule::new(0, 60_000),
            per_key: RateLimitRule::new(0, 60_000),
            admin: RateLimitRule::new(60, 60_000),
            session_creation: RateLimitRule::new(30, 60_000),
        }
    }
}

/// Sliding-window rate limiting composed of a global counter, a per-key
/// counter, and per-`key:tool` counters resolved from a rule table with a
/// `*` fallback, plus separate admin-IP and session-creation-IP limiters.
pub struct RateLimiter {
    global: SlidingWindowLimiter,
    per_key: SlidingWindowLimiter,
    per_tool: SlidingWindowLimiter,
    admin_ip: SlidingWindowLimiter,
    session_creation_ip: SlidingWindowLimiter,
    tool_rules: dashmap::DashMap<String, RateLimitRule>,
    defaults: RateLimiterDefaults,
}

impl RateLimiter {
    #[must_use]
    pub fn new(defaults: RateLimiterDefaults) -> Self {
        Self {
            global: SlidingWindowLimiter::new(),
            per_key: SlidingWindowLimiter::new(),
            per_tool: SlidingWindowLimiter::new(),
            admin_ip: SlidingWindowLimiter::new(),
            session_creation_ip: SlidingWindowLimiter::new(),
            tool_rules: dashmap::DashMap::new(),
            defaults,
        }
    }

    /// Registers (or replaces) the rule for `tool` (use `"*"` for the
    /// wildcard fallback).
    pub fn set_tool_rule(&self, tool: impl Into<String>, rule: RateLimitRule) {
        self.tool_rules.insert(tool.into(), rule);
    }

    fn resolve_tool_rule(&self, tool: &str) -> RateLimitRule {
        if let Some(rule) = self.tool_rules.get(tool).filter(|r| r.active) {
            return *rule;
        }
        if let Some(rule) = self.tool_rules.get("*").filter(|r| r.active) {
            return *rule;
        }
        self.defaults.per_key
    }

    /// Checks (without recording) whether `key_id` may call `tool` now,
    /// combining the global counter, the per-key counter, and the
    /// per-`key:tool` counter. Returns the most restrictive denial.
    /// `key_override` replaces the process default for the per-key counter
    /// when the key carries its own [`RateLimitRule`]-equivalent override.
    #[must_use]
    pub fn check_call(&self, key_id: &str, tool: &str, now: DateTime<Utc>, key_override: Option<RateLimitRule>) -> Decision {
        let global = self
            .global
            .check("__global__", self.defaults.global.limit, self.defaults.global.window_ms, now);
        if !global.allowed {
            return global;
        }
        let per_key_rule = key_override.unwrap_or(self.defaults.per_key);
        let per_key = self.per_key.check(key_id, per_key_rule.limit, per_key_rule.window_ms, now);
        if !per_key.allowed {
            return per_key;
        }
        let rule = self.resolve_tool_rule(tool);
        let subject = format!("{key_id}:{tool}");
        self.per_tool.check(&subject, rule.limit, rule.window_ms, now)
    }

    /// Records a successful call against every counter consulted by
    /// [`Self::check_call`], with the same `key_override`.
    pub fn record_call(&self, key_id: &str, tool: &str, now: DateTime<Utc>, key_override: Option<RateLimitRule>) {
        self.global.record("__global__", self.defaults.global.window_ms, now);
        let per_key_rule = key_override.unwrap_or(self.defaults.per_key);
        self.per_key.record(key_id, per_key_rule.window_ms, now);
        let rule = self.resolve_tool_rule(tool);
        let subject = format!("{key_id}:{tool}");
        self.per_tool.record(&subject, rule.window_ms, now);
    }

    /// Admin rate limiter, keyed by client IP.
    #[must_use]
    pub fn check_admin(&self, ip: &str, now: DateTime<Utc>) -> Decision {
        self.admin_ip
            .check(ip, self.defaults.admin.limit, self.defaults.admin.window_ms, now)
    }

    pub fn record_admin(&self, ip: &str, now: DateTime<Utc>) {
        self.admin_ip.record(ip, self.defaults.admin.window_ms, now);
    }

    /// Session-creation rate limiter, keyed by client IP; only consulted
    /// when a request creates a new session (no existing session header).
    #[must_use]
    pub fn check_session_creation(&self, ip: &str, now: DateTime<Utc>) -> Decision {
        self.session_creation_ip.check(
            ip,
            self.defaults.session_creation.limit,
            self.defaults.session_creation.window_ms,
            now,
        )
    }

    pub fn record_session_creation(&self, ip: &str, now: DateTime<Utc>) {
        self.session_creation_ip
            .record(ip, self.defaults.session_creation.window_ms, now);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterDefaults::default())
    }
}

/// Configuration shape loaded from the (out-of-core) config layer, mirrored
/// here so the admin API and config loader share one rule representation.
#[derive(Debug, Clone, Default)]
pub struct RateLimitFileConfig {
    pub global: Option<RateLimitRule>,
    pub per_key: Option<RateLimitRule>,
    pub admin: Option<RateLimitRule>,
    pub session_creation: Option<RateLimitRule>,
    pub tools: HashMap<String, RateLimitRule>,
}

impl RateLimitFileConfig {
    #[must_use]
    pub fn into_limiter(self) -> RateLimiter {
        let mut defaults = RateLimiterDefaults::default();
        if let Some(r) = self.global {
            defaults.global = r;
        }
        if let Some(r) = self.per_key {
            defaults.per_key = r;
        }
        if let Some(r) = self.admin {
            defaults.admin = r;
        }
        if let Some(r) = self.session_creation {
            defaults.session_creation = r;
        }
        let limiter = RateLimiter::new(defaults);
        for (tool, rule) in self.tools {
            limiter.set_tool_rule(tool, rule);
        }
        limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_defaults_allow_everything() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        let decision = limiter.check_call("k1", "tool_a", now, None);
        assert!(decision.allowed);
    }

    #[test]
    fn per_tool_rule_overrides_wildcard() {
        let limiter = RateLimiter::new(RateLimiterDefaults::default());
        limiter.set_tool_rule("*", RateLimitRule::new(100, 60_000));
        limiter.set_tool_rule("tool_a", RateLimitRule::new(1, 60_000));
        let now = Utc::now();
        assert!(limiter.check_call("k1", "tool_a", now, None).allowed);
        limiter.record_call("k1", "tool_a", now, None);
        let second = limiter.check_call("k1", "tool_a", now, None);
        assert!(!second.allowed);
    }

    #[test]
    fn global_limit_denies_before_per_key_is_checked() {
        let mut defaults = RateLimiterDefaults::default();
        defaults.global = RateLimitRule::new(1, 60_000);
        let limiter = RateLimiter::new(defaults);
        let now = Utc::now();
        limiter.record_call("k1", "tool_a", now, None);
        let decision = limiter.check_call("k2", "tool_a", now, None);
        assert!(!decision.allowed);
    }

    #[test]
    fn per_key_override_replaces_default_per_key_rule() {
        let limiter = RateLimiter::new(RateLimiterDefaults::default());
        let now = Utc::now();
        let override_rule = RateLimitRule::new(1, 60_000);
        assert!(limiter.check_call("k1", "tool_a", now, Some(override_rule)).allowed);
        limiter.record_call("k1", "tool_a", now, Some(override_rule));
        let second = limiter.check_call("k1", "tool_a", now, Some(override_rule));
        assert!(!second.allowed);
        // A different key is unaffected, since defaults remain unlimited.
        assert!(limiter.check_call("k2", "tool_a", now, None).allowed);
    }

    #[test]
    fn inactive_rule_is_skipped_in_favor_of_wildcard() {
        let limiter = RateLimiter::new(RateLimiterDefaults::default());
        limiter.set_tool_rule(
            "tool_a",
            RateLimitRule {
                limit: 1,
                window_ms: 60_000,
                active: false,
            },
        );
        limiter.set_tool_rule("*", RateLimitRule::new(2, 60_000));
        let rule = limiter.resolve_tool_rule("tool_a");
        assert_eq!(rule.limit, 2);
    }

    #[test]
    fn s2_scenario_global_rate_one_per_minute() {
        let mut defaults = RateLimiterDefaults::default();
        defaults.global = RateLimitRule::new(1, 60_000);
        let limiter = RateLimiter::new(defaults);
        let now = Utc::now();
        let first = limiter.check_call("k2", "tool_a", now, None);
        assert!(first.allowed);
        limiter.record_call("k2", "tool_a", now, None);
        let second = limiter.check_call("k2", "tool_a", now, None);
        assert!(!second.allowed);
    }
}
