use chrono::{DateTime, Utc};
use dashmap::DashMap;
use paygate_core::quota::{QuotaAxis, QuotaCounters, QuotaPolicy};

const GLOBAL_SUBJECT: &str = "__global__";

/// Outcome of a quota admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    /// `quota_exceeded:<axis>`.
    Denied { axis: QuotaAxis },
}

/// Per-key and global calendar-window counters for (daily-calls,
/// monthly-calls, daily-credits, monthly-credits).
pub struct QuotaMeter {
    counters: DashMap<String, QuotaCounters>,
}

impl QuotaMeter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    fn rolled(&self, subject: &str, now: DateTime<Utc>) -> QuotaCounters {
        let mut entry = self.counters.entry(subject.to_string()).or_default();
        entry.roll(now);
        entry.clone()
    }

    /// Checks whether charging `credits` for one call against `subject`
    /// would exceed any axis `policy` configures, without committing.
    #[must_use]
    fn check_policy(counters: &QuotaCounters, policy: &QuotaPolicy, credits: u64) -> QuotaDecision {
        for axis in [
            QuotaAxis::DailyCalls,
            QuotaAxis::MonthlyCalls,
            QuotaAxis::DailyCredits,
            QuotaAxis::MonthlyCredits,
        ] {
            if let Some(limit) = policy.limit_for(axis)
                && counters.projected(axis, credits) > limit
            {
                return QuotaDecision::Denied { axis };
            }
        }
        QuotaDecision::Allowed
    }

    /// Evaluates both the per-key policy and the global policy (when set),
    /// rolling each subject's counters to the current civil window first.
    #[must_use]
    pub fn check(
        &self,
        key_id: &str,
        key_policy: Option<&QuotaPolicy>,
        global_policy: Option<&QuotaPolicy>,
        credits: u64,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        if let Some(policy) = key_policy {
            let counters = self.rolled(key_id, now);
            if let QuotaDecision::Denied { axis } = Self::check_policy(&counters, policy, credits) {
                return QuotaDecision::Denied { axis };
            }
        }
        if let Some(policy) = global_policy {
            let counters = self.rolled(GLOBAL_SUBJECT, now);
            if let QuotaDecision::Denied { axis } = Self::check_policy(&counters, policy, credits) {
                return QuotaDecision::Denied { axis };
            }
        }
        QuotaDecision::Allowed
    }

    /// Commits one call of `credits` against the per-key and global
    /// counters. Call only after a successful [`Self::check`].
    pub fn commit(&self, key_id: &str, credits: u64, now: DateTime<Utc>) {
        self.counters
            .entry(key_id.to_string())
            .or_default()
            .commit(credits);
        self.counters
            .entry(GLOBAL_SUBJECT.to_string())
            .or_default()
            .commit(credits);
    }

    #[must_use]
    pub fn usage(&self, key_id: &str, now: DateTime<Utc>) -> QuotaCounters {
        self.rolled(key_id, now)
    }
}

impl Default for QuotaMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn quota_of_zero_is_unlimited() {
        let meter = QuotaMeter::new();
        let policy = QuotaPolicy {
            daily_calls: Some(0),
            ..Default::default()
        };
        let decision = meter.check("k1", Some(&policy), None, 1, Utc::now());
        assert_eq!(decision, QuotaDecision::Allowed);
    }

    #[test]
    fn denies_when_daily_call_quota_would_be_exceeded() {
        let meter = QuotaMeter::new();
        let now = at("2026-01-01T00:00:00Z");
        let policy = QuotaPolicy {
            daily_calls: Some(1),
            ..Default::default()
        };
        assert_eq!(
            meter.check("k1", Some(&policy), None, 1, now),
            QuotaDecision::Allowed
        );
        meter.commit("k1", 1, now);
        assert_eq!(
            meter.check("k1", Some(&policy), None, 1, now),
            QuotaDecision::Denied {
                axis: QuotaAxis::DailyCalls
            }
        );
    }

    #[test]
    fn counters_reset_across_day_boundary() {
        let meter = QuotaMeter::new();
        let day1 = at("2026-01-01T23:00:00Z");
        let day2 = at("2026-01-02T01:00:00Z");
        let policy = QuotaPolicy {
            daily_calls: Some(1),
            ..Default::default()
        };
        meter.commit("k1", 1, day1);
        assert_eq!(
            meter.check("k1", Some(&policy), None, 1, day1),
            QuotaDecision::Denied {
                axis: QuotaAxis::DailyCalls
            }
        );
        assert_eq!(
            meter.check("k1", Some(&policy), None, 1, day2),
            QuotaDecision::Allowed
        );
    }

    #[test]
    fn global_policy_is_checked_independently_of_key_policy() {
        let meter = QuotaMeter::new();
        let now = Utc::now();
        let global_policy = QuotaPolicy {
            daily_credits: Some(5),
            ..Default::default()
        };
        meter.commit("k1", 5, now);
        let decision = meter.check("k2", None, Some(&global_policy), 1, now);
        assert_eq!(
            decision,
            QuotaDecision::Denied {
                axis: QuotaAxis::DailyCredits
            }
        );
    }
}
