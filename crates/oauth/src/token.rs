use serde::{Deserialize, Serialize};

/// Access-token lifetime.
pub const ACCESS_TOKEN_TTL_MS: i64 = 3_600_000;
/// Refresh-token lifetime.
pub const REFRESH_TOKEN_TTL_MS: i64 = 30 * 24 * 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// An opaque bearer token (`pg_at_...` / `pg_rt_...`). Every access token
/// shares a `family` tag with its sibling refresh token so both can be
/// revoked atomically (RFC 7009).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    pub kind: TokenKind,
    pub client_id: String,
    pub scope: String,
    pub key_id: String,
    pub family: String,
    /// Unix milliseconds.
    pub expires_at: i64,
}

impl Token {
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// The result of a successful grant: an access token, always; a refresh
/// token, except for the client-credentials grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub scope: String,
}

/// Result of [`crate::server::OAuthServer::validate_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub api_key: String,
    pub scope: String,
    pub client_id: String,
}
