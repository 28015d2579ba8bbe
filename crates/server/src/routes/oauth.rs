use axum::Json;
use axum::extract::State;
use paygate_core::PaygateError;
use paygate_oauth::{GrantType, OAuthClient, ServerMetadata, TokenPair};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

use super::audit_log;

#[derive(Debug, Deserialize)]
pub struct RegisterClientRequest {
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<GrantType>,
    pub scope: String,
    #[serde(default)]
    pub confidential: bool,
}

pub async fn register(State(state): State<AppState>, Json(req): Json<RegisterClientRequest>) -> Result<Json<OAuthClient>, ApiError> {
    let client = state
        .oauth
        .register_client(req.name, req.redirect_uris, req.grant_types, req.scope, req.confidential)
        .map_err(PaygateError::from)?;
    audit_log(&state, "oauth.client_registered", &client.client_id, "client registered").await;
    Ok(Json(client))
}

#[derive(Debug, Deserialize)]
pub struct BindKeyRequest {
    pub client_id: String,
    pub key: String,
}

/// Admin-only: binds a registered client to a `KeyStore` key. No token can
/// be issued for a client until this runs.
pub async fn bind_key(State(state): State<AppState>, Json(req): Json<BindKeyRequest>) -> Result<(), ApiError> {
    state.oauth.bind_key(&req.client_id, req.key.clone()).map_err(PaygateError::from)?;
    audit_log(&state, "oauth.client_bound", &req.client_id, &format!("bound to key \"{}\"", req.key)).await;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    #[serde(default)]
    pub scope: String,
}

pub async fn authorize(State(state): State<AppState>, Json(req): Json<AuthorizeRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let code = state
        .oauth
        .create_auth_code(&req.client_id, &req.redirect_uri, &req.code_challenge, &req.scope)
        .map_err(PaygateError::from)?;
    Ok(Json(serde_json::json!({ "code": code.code, "redirect_uri": code.redirect_uri })))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum TokenRequest {
    AuthorizationCode {
        code: String,
        client_id: String,
        redirect_uri: String,
        code_verifier: String,
    },
    RefreshToken {
        refresh_token: String,
        client_id: String,
        scope: Option<String>,
    },
    ClientCredentials {
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scope: String,
    },
}

pub async fn token(State(state): State<AppState>, Json(req): Json<TokenRequest>) -> Result<Json<TokenPair>, ApiError> {
    let pair = match req {
        TokenRequest::AuthorizationCode {
            code,
            client_id,
            redirect_uri,
            code_verifier,
        } => state.oauth.exchange_code(&code, &client_id, &redirect_uri, &code_verifier).map_err(PaygateError::from)?,
        TokenRequest::RefreshToken { refresh_token, client_id, scope } => {
            state.oauth.refresh_access_token(&refresh_token, &client_id, scope.as_deref()).map_err(PaygateError::from)?
        }
        TokenRequest::ClientCredentials { client_id, client_secret, scope } => {
            state.oauth.client_credentials_grant(&client_id, &client_secret, &scope).map_err(PaygateError::from)?
        }
    };
    Ok(Json(pair))
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

pub async fn revoke(State(state): State<AppState>, Json(req): Json<RevokeRequest>) {
    state.oauth.revoke(&req.token);
}

pub async fn metadata(State(state): State<AppState>) -> Json<ServerMetadata> {
    Json(state.oauth.metadata())
}
