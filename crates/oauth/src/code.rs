use serde::{Deserialize, Serialize};

/// Lifetime of an authorization code before it expires unused.
pub const AUTH_CODE_TTL_MS: i64 = 60_000;

/// A one-use, short-lived authorization code (RFC 6749 §4.1 plus mandatory
/// PKCE S256, RFC 7636).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
    pub key_id: String,
    /// Unix milliseconds.
    pub expires_at: i64,
}

impl AuthCode {
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}
