use std::path::PathBuf;

use chrono::Utc;
use dashmap::DashMap;
use paygate_core::generate_id;
use paygate_store::persistence::{CoalescingSaver, load_json};
use subtle::ConstantTimeEq;

use crate::client::{GrantType, OAuthClient, validate_redirect_uris};
use crate::code::{AUTH_CODE_TTL_MS, AuthCode};
use crate::error::OAuthError;
use crate::pkce;
use crate::token::{ACCESS_TOKEN_TTL_MS, REFRESH_TOKEN_TTL_MS, Token, TokenKind, TokenPair, ValidatedToken};

/// Upper bound on registered clients.
pub const MAX_CLIENTS: usize = 10_000;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// RFC 8414 authorization server metadata.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: String,
    pub registration_endpoint: String,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct OAuthSnapshot {
    clients: Vec<OAuthClient>,
    tokens: Vec<Token>,
}

/// Issues and validates opaque OAuth 2.1 bearer tokens backed by KeyStore
/// credentials. Codes and in-flight grants are ephemeral; clients and
/// tokens persist via the same atomic-rename JSON scheme as `KeyStore`.
pub struct OAuthServer {
    issuer: String,
    clients: DashMap<String, OAuthClient>,
    codes: DashMap<String, AuthCode>,
    tokens: DashMap<String, Token>,
    saver: Option<CoalescingSaver>,
}

impl OAuthServer {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            clients: DashMap::new(),
            codes: DashMap::new(),
            tokens: DashMap::new(),
            saver: None,
        }
    }

    #[must_use]
    pub fn with_persistence(issuer: impl Into<String>, path: PathBuf) -> Self {
        let mut server = Self::new(issuer);
        server.saver = Some(CoalescingSaver::new(path));
        server
    }

    pub fn load(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(snapshot) = load_json::<OAuthSnapshot>(path)? {
            self.clients.clear();
            self.tokens.clear();
            for client in snapshot.clients {
                self.clients.insert(client.client_id.clone(), client);
            }
            for token in snapshot.tokens {
                self.tokens.insert(token.token.clone(), token);
            }
        }
        Ok(())
    }

    fn request_save(&self) {
        if let Some(saver) = &self.saver {
            let clients = self.clients.clone();
            let tokens = self.tokens.clone();
            saver.request_save(move || OAuthSnapshot {
                clients: clients.iter().map(|e| e.value().clone()).collect(),
                tokens: tokens.iter().map(|e| e.value().clone()).collect(),
            });
        }
    }

    /// Registers a new dynamic client (RFC 7591). `confidential` controls
    /// whether a `client_secret` is generated. The client cannot issue
    /// tokens until an admin binds it to a key with [`Self::bind_key`].
    pub fn register_client(
        &self,
        name: impl Into<String>,
        redirect_uris: Vec<String>,
        grant_types: Vec<GrantType>,
        scope: impl Into<String>,
        confidential: bool,
    ) -> Result<OAuthClient, OAuthError> {
        validate_redirect_uris(&redirect_uris)?;
        if self.clients.len() >= MAX_CLIENTS {
            return Err(OAuthError::InvalidRequest("maximum client count exceeded".to_string()));
        }
        let client = OAuthClient {
            client_id: generate_id("pg_client", 16),
            client_secret: confidential.then(|| generate_id("pg_secret", 24)),
            name: name.into(),
            redirect_uris,
            grant_types,
            scope: scope.into(),
            key_id: None,
        };
        self.clients.insert(client.client_id.clone(), client.clone());
        self.request_save();
        Ok(client)
    }

    /// Admin action: binds `client_id` to a KeyStore key. Required before
    /// any grant can issue a token for this client.
    pub fn bind_key(&self, client_id: &str, key_id: impl Into<String>) -> Result<(), OAuthError> {
        let mut entry = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| OAuthError::UnknownClient(client_id.to_string()))?;
        entry.key_id = Some(key_id.into());
        drop(entry);
        self.request_save();
        Ok(())
    }

    fn client(&self, client_id: &str) -> Result<OAuthClient, OAuthError> {
        self.clients
            .get(client_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OAuthError::UnknownClient(client_id.to_string()))
    }

    /// Creates a short-lived authorization code. PKCE `code_challenge` is
    /// mandatory; this call fails without one.
    pub fn create_auth_code(
        &self,
        client_id: &str,
        redirect_uri: &str,
        code_challenge: &str,
        scope: &str,
    ) -> Result<AuthCode, OAuthError> {
        if code_challenge.is_empty() {
            return Err(OAuthError::MissingCodeChallenge);
        }
        let client = self.client(client_id)?;
        let key_id = client.key_id.clone().ok_or_else(|| OAuthError::ClientNotBound(client_id.to_string()))?;
        if !client.supports(GrantType::AuthorizationCode) {
            return Err(OAuthError::UnsupportedGrantType);
        }
        if !client.redirect_uri_registered(redirect_uri) {
            return Err(OAuthError::RedirectUriMismatch);
        }
        let code = AuthCode {
            code: generate_id("pg_code", 20),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            code_challenge: code_challenge.to_string(),
            scope: scope.to_string(),
            key_id,
            expires_at: now_ms() + AUTH_CODE_TTL_MS,
        };
        self.codes.insert(code.code.clone(), code.clone());
        Ok(code)
    }

    fn issue_pair(&self, client_id: &str, key_id: &str, scope: &str, with_refresh: bool) -> TokenPair {
        let family = generate_id("pg_family", 12);
        let now = now_ms();
        let access = Token {
            token: generate_id("pg_at", 24),
            kind: TokenKind::Access,
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            key_id: key_id.to_string(),
            family: family.clone(),
            expires_at: now + ACCESS_TOKEN_TTL_MS,
        };
        let refresh_token = with_refresh.then(|| {
            let refresh = Token {
                token: generate_id("pg_rt", 24),
                kind: TokenKind::Refresh,
                client_id: client_id.to_string(),
                scope: scope.to_string(),
                key_id: key_id.to_string(),
                family,
                expires_at: now + REFRESH_TOKEN_TTL_MS,
            };
            let token = refresh.token.clone();
            self.tokens.insert(refresh.token.clone(), refresh);
            token
        });
        self.tokens.insert(access.token.clone(), access.clone());
        self.request_save();
        TokenPair {
            access_token: access.token,
            refresh_token,
            token_type: "Bearer",
            expires_in: ACCESS_TOKEN_TTL_MS / 1_000,
            scope: scope.to_string(),
        }
    }

    /// Exchanges a one-use authorization code for an access+refresh token
    /// pair. The code is deleted before any validation runs, so two
    /// concurrent exchanges of the same code can never both succeed.
    pub fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenPair, OAuthError> {
        let (_, code) = self.codes.remove(code).ok_or(OAuthError::UnknownCode)?;

        if code.is_expired(now_ms()) {
            return Err(OAuthError::CodeExpired);
        }
        if code.client_id != client_id {
            return Err(OAuthError::UnknownClient(client_id.to_string()));
        }
        if code.redirect_uri != redirect_uri {
            return Err(OAuthError::RedirectUriMismatch);
        }
        if !pkce::verify_s256(code_verifier, &code.code_challenge) {
            return Err(OAuthError::PkceMismatch);
        }

        Ok(self.issue_pair(client_id, &code.key_id, &code.scope, true))
    }

    /// Refreshes an access token. Scope may be narrowed relative to the
    /// original grant, never widened.
    pub fn refresh_access_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        requested_scope: Option<&str>,
    ) -> Result<TokenPair, OAuthError> {
        let token = self
            .tokens
            .get(refresh_token)
            .map(|e| e.value().clone())
            .ok_or(OAuthError::UnknownToken)?;

        if token.kind != TokenKind::Refresh {
            return Err(OAuthError::NotARefreshToken);
        }
        if token.client_id != client_id {
            return Err(OAuthError::UnknownClient(client_id.to_string()));
        }
        if token.is_expired(now_ms()) {
            return Err(OAuthError::TokenExpired);
        }

        let scope = match requested_scope {
            Some(requested) => {
                let original: std::collections::HashSet<&str> = token.scope.split_whitespace().collect();
                let narrowed: std::collections::HashSet<&str> = requested.split_whitespace().collect();
                if !narrowed.is_subset(&original) {
                    return Err(OAuthError::ScopeWidened);
                }
                requested.to_string()
            }
            None => token.scope.clone(),
        };

        Ok(self.issue_pair(client_id, &token.key_id, &scope, true))
    }

    /// Client-credentials grant. Confidential clients only; the secret is
    /// compared in constant time. No refresh token is issued.
    pub fn client_credentials_grant(
        &self,
        client_id: &str,
        client_secret: &str,
        scope: &str,
    ) -> Result<TokenPair, OAuthError> {
        let client = self.client(client_id)?;
        if !client.supports(GrantType::ClientCredentials) {
            return Err(OAuthError::UnsupportedGrantType);
        }
        let Some(expected) = &client.client_secret else {
            return Err(OAuthError::NotConfidential);
        };
        let matches = expected.len() == client_secret.len()
            && expected.as_bytes().ct_eq(client_secret.as_bytes()).unwrap_u8() == 1;
        if !matches {
            return Err(OAuthError::InvalidSecret);
        }
        let key_id = client.key_id.ok_or_else(|| OAuthError::ClientNotBound(client_id.to_string()))?;
        Ok(self.issue_pair(client_id, &key_id, scope, false))
    }

    /// Validates an access token, returning the credential it resolves to.
    /// A lookup of an expired token opportunistically evicts it.
    #[must_use]
    pub fn validate_token(&self, token: &str) -> Option<ValidatedToken> {
        let entry = self.tokens.get(token)?;
        if entry.kind != TokenKind::Access {
            return None;
        }
        if entry.is_expired(now_ms()) {
            let client_id = entry.client_id.clone();
            drop(entry);
            self.tokens.remove(token);
            tracing::debug!(client_id, "evicted expired access token on lookup");
            return None;
        }
        Some(ValidatedToken {
            api_key: entry.key_id.clone(),
            scope: entry.scope.clone(),
            client_id: entry.client_id.clone(),
        })
    }

    /// Revokes `token` and every other token sharing its family (RFC 7009).
    pub fn revoke(&self, token: &str) {
        let Some(family) = self.tokens.get(token).map(|e| e.family.clone()) else {
            return;
        };
        self.tokens.retain(|_, t| t.family != family);
        self.request_save();
    }

    /// Removes every expired code and token. Intended to run on a coarse
    /// periodic tick (e.g. every 5 minutes).
    pub fn cleanup_sweep(&self) {
        let now = now_ms();
        self.codes.retain(|_, c| !c.is_expired(now));
        let before = self.tokens.len();
        self.tokens.retain(|_, t| !t.is_expired(now));
        if self.tokens.len() != before {
            self.request_save();
        }
    }

    #[must_use]
    pub fn metadata(&self) -> ServerMetadata {
        ServerMetadata {
            issuer: self.issuer.clone(),
            authorization_endpoint: format!("{}/oauth/authorize", self.issuer),
            token_endpoint: format!("{}/oauth/token", self.issuer),
            revocation_endpoint: format!("{}/oauth/revoke", self.issuer),
            registration_endpoint: format!("{}/oauth/register", self.issuer),
            code_challenge_methods_supported: vec!["S256"],
            grant_types_supported: vec!["authorization_code", "refresh_token", "client_credentials"],
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use sha2::{Digest, Sha256};

    use super::*;

    fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    fn bound_client(server: &OAuthServer, grants: Vec<GrantType>, confidential: bool) -> OAuthClient {
        let client = server
            .register_client("test app", vec!["https://app.example/cb".to_string()], grants, "tools:read", confidential)
            .unwrap();
        server.bind_key(&client.client_id, "pg_testkey").unwrap();
        server.client(&client.client_id).unwrap()
    }

    #[test]
    fn create_auth_code_requires_challenge() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(&server, vec![GrantType::AuthorizationCode], false);
        let err = server
            .create_auth_code(&client.client_id, "https://app.example/cb", "", "tools:read")
            .unwrap_err();
        assert_eq!(err, OAuthError::MissingCodeChallenge);
    }

    #[test]
    fn full_authorization_code_flow_with_pkce() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(&server, vec![GrantType::AuthorizationCode], false);
        let verifier = "a-high-entropy-verifier-string-1234567890";
        let challenge = challenge_for(verifier);

        let code = server
            .create_auth_code(&client.client_id, "https://app.example/cb", &challenge, "tools:read")
            .unwrap();

        let pair = server
            .exchange_code(&code.code, &client.client_id, "https://app.example/cb", verifier)
            .unwrap();
        assert!(pair.refresh_token.is_some());

        let validated = server.validate_token(&pair.access_token).unwrap();
        assert_eq!(validated.api_key, "pg_testkey");
    }

    #[test]
    fn code_is_single_use() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(&server, vec![GrantType::AuthorizationCode], false);
        let verifier = "a-high-entropy-verifier-string-1234567890";
        let challenge = challenge_for(verifier);
        let code = server
            .create_auth_code(&client.client_id, "https://app.example/cb", &challenge, "tools:read")
            .unwrap();

        server
            .exchange_code(&code.code, &client.client_id, "https://app.example/cb", verifier)
            .unwrap();
        let second = server.exchange_code(&code.code, &client.client_id, "https://app.example/cb", verifier);
        assert_eq!(second.unwrap_err(), OAuthError::UnknownCode);
    }

    #[test]
    fn mismatched_pkce_verifier_is_rejected() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(&server, vec![GrantType::AuthorizationCode], false);
        let challenge = challenge_for("correct-verifier");
        let code = server
            .create_auth_code(&client.client_id, "https://app.example/cb", &challenge, "tools:read")
            .unwrap();
        let err = server
            .exchange_code(&code.code, &client.client_id, "https://app.example/cb", "wrong-verifier")
            .unwrap_err();
        assert_eq!(err, OAuthError::PkceMismatch);
    }

    #[test]
    fn refresh_grant_can_narrow_but_not_widen_scope() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(
            &server,
            vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            false,
        );
        let verifier = "a-high-entropy-verifier-string-1234567890";
        let challenge = challenge_for(verifier);
        let code = server
            .create_auth_code(&client.client_id, "https://app.example/cb", &challenge, "tools:read tools:write")
            .unwrap();
        let pair = server
            .exchange_code(&code.code, &client.client_id, "https://app.example/cb", verifier)
            .unwrap();
        let refresh = pair.refresh_token.unwrap();

        let narrowed = server
            .refresh_access_token(&refresh, &client.client_id, Some("tools:read"))
            .unwrap();
        assert_eq!(narrowed.scope, "tools:read");

        let widened = server.refresh_access_token(&refresh, &client.client_id, Some("tools:read tools:admin"));
        assert_eq!(widened.unwrap_err(), OAuthError::ScopeWidened);
    }

    #[test]
    fn client_credentials_grant_requires_correct_secret() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(&server, vec![GrantType::ClientCredentials], true);
        let secret = client.client_secret.clone().unwrap();

        let pair = server
            .client_credentials_grant(&client.client_id, &secret, "tools:read")
            .unwrap();
        assert!(pair.refresh_token.is_none());

        let err = server.client_credentials_grant(&client.client_id, "wrong", "tools:read");
        assert_eq!(err.unwrap_err(), OAuthError::InvalidSecret);
    }

    #[test]
    fn client_credentials_requires_confidential_client() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(&server, vec![GrantType::ClientCredentials], false);
        let err = server.client_credentials_grant(&client.client_id, "anything", "tools:read");
        assert_eq!(err.unwrap_err(), OAuthError::NotConfidential);
    }

    #[test]
    fn revoking_one_token_revokes_the_whole_family() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(&server, vec![GrantType::AuthorizationCode], false);
        let verifier = "a-high-entropy-verifier-string-1234567890";
        let challenge = challenge_for(verifier);
        let code = server
            .create_auth_code(&client.client_id, "https://app.example/cb", &challenge, "tools:read")
            .unwrap();
        let pair = server
            .exchange_code(&code.code, &client.client_id, "https://app.example/cb", verifier)
            .unwrap();

        server.revoke(&pair.access_token);

        assert!(server.validate_token(&pair.access_token).is_none());
        assert!(
            server
                .refresh_access_token(&pair.refresh_token.unwrap(), &client.client_id, None)
                .is_err()
        );
    }

    #[test]
    fn unbound_client_cannot_create_auth_code() {
        let server = OAuthServer::new("https://gate.example");
        let client = server
            .register_client(
                "unbound",
                vec!["https://app.example/cb".to_string()],
                vec![GrantType::AuthorizationCode],
                "tools:read",
                false,
            )
            .unwrap();
        let err = server.create_auth_code(&client.client_id, "https://app.example/cb", "challenge", "tools:read");
        assert_eq!(err.unwrap_err(), OAuthError::ClientNotBound(client.client_id));
    }

    #[test]
    fn cleanup_sweep_removes_expired_codes() {
        let server = OAuthServer::new("https://gate.example");
        let client = bound_client(&server, vec![GrantType::AuthorizationCode], false);
        let code = server
            .create_auth_code(&client.client_id, "https://app.example/cb", "challenge", "tools:read")
            .unwrap();
        server.codes.get_mut(&code.code).unwrap().expires_at = now_ms() - 1;
        server.cleanup_sweep();
        assert!(server.codes.is_empty());
    }

    #[test]
    fn metadata_exposes_well_known_endpoints() {
        let server = OAuthServer::new("https://gate.example");
        let metadata = server.metadata();
        assert_eq!(metadata.token_endpoint, "https://gate.example/oauth/token");
        assert_eq!(metadata.code_challenge_methods_supported, vec!["S256"]);
    }
}
