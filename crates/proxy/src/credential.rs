use paygate_oauth::OAuthServer;

/// Resolved caller credential, carrying along whatever OAuth scope applied
/// (if the credential came in as a bearer token).
#[derive(Debug, Clone)]
pub struct Credential {
    pub api_key: String,
    pub scope: Option<String>,
}

/// Resolves the caller credential per the proxy's resolution order:
/// `X-API-Key` header first, then an `Authorization: Bearer ...` token
/// validated through `oauth`. Returns `None` if neither header is present
/// or the bearer token does not validate.
#[must_use]
pub fn resolve(api_key_header: Option<&str>, bearer_token: Option<&str>, oauth: &OAuthServer) -> Option<Credential> {
    if let Some(key) = api_key_header {
        if !key.is_empty() {
            return Some(Credential {
                api_key: key.to_string(),
                scope: None,
            });
        }
    }
    let token = bearer_token?;
    let validated = oauth.validate_token(token)?;
    Some(Credential {
        api_key: validated.api_key,
        scope: Some(validated.scope),
    })
}

/// Extracts the bearer token from a raw `Authorization` header value, if
/// it uses the `Bearer` scheme.
#[must_use]
pub fn bearer_from_header(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_oauth::GrantType;

    fn server_with_bound_token() -> (OAuthServer, String) {
        let server = OAuthServer::new("https://gate.example.test");
        let client = server
            .register_client(
                "test",
                vec!["https://app.example.test/cb".into()],
                vec![GrantType::ClientCredentials],
                "tools",
                true,
            )
            .expect("registration succeeds");
        server.bind_key(&client.client_id, "pg_key_1").unwrap();
        let secret = client.client_secret.clone().unwrap();
        let pair = server
            .client_credentials_grant(&client.client_id, &secret, "tools")
            .expect("grant succeeds");
        (server, pair.access_token)
    }

    #[test]
    fn api_key_header_takes_priority_over_bearer() {
        let (server, token) = server_with_bound_token();
        let cred = resolve(Some("pg_direct"), Some(token.as_str()), &server).unwrap();
        assert_eq!(cred.api_key, "pg_direct");
        assert!(cred.scope.is_none());
    }

    #[test]
    fn bearer_token_resolves_through_oauth() {
        let (server, token) = server_with_bound_token();
        let cred = resolve(None, Some(token.as_str()), &server).unwrap();
        assert_eq!(cred.api_key, "pg_key_1");
    }

    #[test]
    fn no_credential_present_resolves_to_none() {
        let server = OAuthServer::new("https://gate.example.test");
        assert!(resolve(None, None, &server).is_none());
    }

    #[test]
    fn invalid_bearer_token_resolves_to_none() {
        let server = OAuthServer::new("https://gate.example.test");
        assert!(resolve(None, Some("garbage"), &server).is_none());
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        assert_eq!(bearer_from_header("Bearer abc123"), Some("abc123"));
        assert_eq!(bearer_from_header("Basic abc123"), None);
    }
}
