use paygate_core::Credit;

/// Outcome of [`crate::Gate::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Stable machine-readable denial reason, e.g. `insufficient_credits`,
    /// `quota_exceeded:daily_calls`. `None` when `allowed` is true.
    pub reason: Option<String>,
    pub credits_charged: Credit,
    /// Whether the balance was actually debited (false in shadow mode or
    /// on any denial).
    pub debit_applied: bool,
}

impl Decision {
    #[must_use]
    pub fn allow(credits_charged: Credit, debit_applied: bool) -> Self {
        Self {
            allowed: true,
            reason: None,
            credits_charged,
            debit_applied,
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            credits_charged: 0,
            debit_applied: false,
        }
    }
}
