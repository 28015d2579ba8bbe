use serde::{Deserialize, Serialize};

/// Maximum number of redirect URIs a client may register.
pub const MAX_REDIRECT_URIS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

/// A dynamically registered OAuth client (RFC 7591). Must be bound to a
/// KeyStore key by an admin before it can issue any token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    /// Present only for confidential clients.
    pub client_secret: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<GrantType>,
    pub scope: String,
    /// The KeyStore key this client's tokens resolve to. `None` until an
    /// admin binds it.
    pub key_id: Option<String>,
}

impl OAuthClient {
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    #[must_use]
    pub fn supports(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    #[must_use]
    pub fn redirect_uri_registered(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|r| r == uri)
    }
}

/// Validates a batch of candidate redirect URIs: each must parse as an
/// absolute URL, and the count must not exceed [`MAX_REDIRECT_URIS`].
pub fn validate_redirect_uris(uris: &[String]) -> Result<(), crate::error::OAuthError> {
    if uris.is_empty() {
        return Err(crate::error::OAuthError::InvalidRedirectUri(
            "at least one redirect_uri is required".to_string(),
        ));
    }
    if uris.len() > MAX_REDIRECT_URIS {
        return Err(crate::error::OAuthError::TooManyRedirectUris(MAX_REDIRECT_URIS));
    }
    for uri in uris {
        url::Url::parse(uri).map_err(|e| crate::error::OAuthError::InvalidRedirectUri(format!("{uri}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_redirect_list() {
        assert!(validate_redirect_uris(&[]).is_err());
    }

    #[test]
    fn rejects_unparseable_uri() {
        let uris = vec!["not a url".to_string()];
        assert!(validate_redirect_uris(&uris).is_err());
    }

    #[test]
    fn rejects_too_many_uris() {
        let uris: Vec<String> = (0..20).map(|i| format!("https://example.com/{i}")).collect();
        assert!(validate_redirect_uris(&uris).is_err());
    }

    #[test]
    fn accepts_valid_uris() {
        let uris = vec!["https://example.com/cb".to_string()];
        assert!(validate_redirect_uris(&uris).is_ok());
    }
}
