use thiserror::Error;

/// Error taxonomy shared by every layer of the gate. Each variant maps to
/// exactly one externally observable outcome (HTTP status and/or JSON-RPC
/// error code) at the proxy boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaygateError {
    /// Malformed input, missing required field, out-of-range numeric.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing/invalid API key, bad admin key, invalid OAuth client or secret.
    #[error("auth error: {0}")]
    Auth(String),

    /// Gate denied admission. `reason` is one of the stable denial codes.
    #[error("policy denial: {reason}")]
    PolicyDenial {
        /// Stable machine-readable reason, e.g. `insufficient_credits`.
        reason: String,
    },

    /// Unknown key/group/session/filter.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate name, duplicate alias.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Public-endpoint or session-creation throttle.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the caller may retry.
        retry_after_secs: u64,
    },

    /// Transport or JSON parse failure from the upstream tool server.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PaygateError {
    /// Stable denial reason for a `tools/call` admission refusal.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::PolicyDenial {
            reason: reason.into(),
        }
    }
}
