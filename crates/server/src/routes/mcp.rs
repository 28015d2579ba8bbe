use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, body::Bytes};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use paygate_proxy::jsonrpc::PARSE_ERROR;
use paygate_proxy::{JsonRpcRequest, JsonRpcResponse, RequestContext};
use serde_json::json;
use tokio_stream::wrappers::IntervalStream;

use crate::state::AppState;

const SESSION_HEADER: &str = "mcp-session-id";

fn maintenance_response() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "under maintenance" }))).into_response()
}

/// `POST /mcp`: parse, dispatch, respond JSON or one SSE frame depending
/// on `Accept`.
pub async fn handle_post(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, headers: HeaderMap, body: Bytes) -> Response {
    if state.is_under_maintenance() {
        return maintenance_response();
    }

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let error = JsonRpcResponse::error(serde_json::Value::Null, PARSE_ERROR, format!("parse error: {e}"));
            return (StatusCode::BAD_REQUEST, Json(error)).into_response();
        }
    };

    let session_id_header = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);

    if session_id_header.is_none() {
        let ip = addr.ip().to_string();
        let now = Utc::now();
        if !state.rate_limiter.check_session_creation(&ip, now).allowed {
            return (StatusCode::TOO_MANY_REQUESTS, "session creation rate limited").into_response();
        }
        state.rate_limiter.record_session_creation(&ip, now);
    }

    let accept_sse = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()).is_some_and(|v| v.contains("text/event-stream"));

    let ctx = RequestContext {
        api_key_header: headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string),
        authorization_header: headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_string),
        session_id_header,
        client_ip: Some(addr.ip()),
        accept_sse,
    };

    let response = state.proxy.handle_request(request, ctx).await;

    let mut http_response = if accept_sse {
        let frame = format!("data: {}\n\n", serde_json::to_string(&response.body).unwrap_or_default());
        ([(header::CONTENT_TYPE, "text/event-stream")], frame).into_response()
    } else {
        Json(&response.body).into_response()
    };

    if let Ok(value) = response.session_id.parse() {
        http_response.headers_mut().insert("mcp-session-id", value);
    }
    http_response
}

/// `DELETE /mcp`: destroys a session. 404 unknown, 400 missing header.
pub async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Mcp-Session-Id header required").into_response();
    };
    if state.proxy.sessions().destroy(session_id) {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// `GET /mcp` with `Accept: text/event-stream` opens a notification
/// channel; any other `GET /mcp` is `405`.
pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let accept_sse = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()).is_some_and(|v| v.contains("text/event-stream"));
    if !accept_sse {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Mcp-Session-Id header required").into_response();
    };
    if state.proxy.sessions().get(session_id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    state.proxy.sessions().touch(session_id);

    let initial = Event::default()
        .json_data(json!({
            "method": "notifications/initialized",
            "params": { "sessionId": session_id },
        }))
        .expect("static JSON payload always serializes");
    let initial_stream = stream::once(async move { Ok(initial) });

    let keep_alives = IntervalStream::new(tokio::time::interval(Duration::from_secs(15))).map(|_| Ok(Event::default().comment("keep-alive")));

    let combined: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> = Box::pin(initial_stream.chain(keep_alives));

    Sse::new(combined).keep_alive(KeepAlive::default()).into_response()
}
