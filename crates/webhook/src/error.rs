use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("destination resolved to a blocked address: {0}")]
    SsrfBlocked(String),

    #[error("HMAC signing error: {0}")]
    SigningError(String),

    #[error("filter rule not found: {0}")]
    RuleNotFound(String),
}

impl WebhookError {
    /// Whether this failure should be retried (5xx, timeout, connection
    /// error) as opposed to treated as permanent (4xx, SSRF block).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.status().is_none_or(|s| s.is_server_error()),
            Self::UnexpectedStatus { status } => (500..600).contains(status),
            Self::SsrfBlocked(_) | Self::SigningError(_) | Self::RuleNotFound(_) => false,
        }
    }
}

impl From<WebhookError> for paygate_core::PaygateError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::RuleNotFound(id) => Self::NotFound(format!("webhook filter {id}")),
            other => Self::Internal(other.to_string()),
        }
    }
}
