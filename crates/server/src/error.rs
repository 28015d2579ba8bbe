use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use paygate_core::PaygateError;
use serde_json::json;

/// Wraps [`PaygateError`] so it can be returned directly from an axum
/// handler and renders the plain-HTTP admin/public-endpoint mapping from
/// the error taxonomy. JSON-RPC responses on `/mcp` are built separately
/// since `-32402` denials return HTTP 200.
pub struct ApiError(pub PaygateError);

impl From<PaygateError> for ApiError {
    fn from(err: PaygateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self.0 {
            PaygateError::Validation(_) | PaygateError::Conflict(_) => (StatusCode::BAD_REQUEST, None),
            PaygateError::Auth(_) => (StatusCode::UNAUTHORIZED, None),
            PaygateError::PolicyDenial { .. } => (StatusCode::OK, None),
            PaygateError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            PaygateError::RateLimited { retry_after_secs } => (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after_secs)),
            PaygateError::Upstream(_) => (StatusCode::BAD_GATEWAY, None),
            PaygateError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = Json(json!({ "error": self.0.to_string() }));
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert("Retry-After", value);
        }
        response
    }
}
