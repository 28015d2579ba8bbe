use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OAuthError {
    #[error("unknown client: {0}")]
    UnknownClient(String),

    #[error("invalid client secret")]
    InvalidSecret,

    #[error("client {0} is not bound to a key yet")]
    ClientNotBound(String),

    #[error("redirect_uri does not match the one registered for this client")]
    RedirectUriMismatch,

    #[error("invalid redirect_uri: {0}")]
    InvalidRedirectUri(String),

    #[error("too many redirect_uris (max {0})")]
    TooManyRedirectUris(usize),

    #[error("a PKCE S256 code_challenge is required")]
    MissingCodeChallenge,

    #[error("PKCE verification failed")]
    PkceMismatch,

    #[error("unknown or already-consumed authorization code")]
    UnknownCode,

    #[error("authorization code has expired")]
    CodeExpired,

    #[error("unknown token")]
    UnknownToken,

    #[error("token is not a refresh token")]
    NotARefreshToken,

    #[error("token has expired")]
    TokenExpired,

    #[error("client does not support this grant type")]
    UnsupportedGrantType,

    #[error("client-credentials grant requires a confidential client")]
    NotConfidential,

    #[error("requested scope widens the original grant")]
    ScopeWidened,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<OAuthError> for paygate_core::PaygateError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::UnknownClient(_)
            | OAuthError::InvalidSecret
            | OAuthError::ClientNotBound(_)
            | OAuthError::RedirectUriMismatch
            | OAuthError::MissingCodeChallenge
            | OAuthError::PkceMismatch
            | OAuthError::UnknownCode
            | OAuthError::CodeExpired
            | OAuthError::UnknownToken
            | OAuthError::NotARefreshToken
            | OAuthError::TokenExpired
            | OAuthError::UnsupportedGrantType
            | OAuthError::NotConfidential
            | OAuthError::ScopeWidened => Self::Auth(err.to_string()),
            OAuthError::InvalidRedirectUri(_)
            | OAuthError::TooManyRedirectUris(_)
            | OAuthError::InvalidRequest(_) => Self::Validation(err.to_string()),
        }
    }
}
