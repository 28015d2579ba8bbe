use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use paygate_audit::AuditStore;
use paygate_core::ids::mask_identifier;
use paygate_gate::Gate;
use paygate_oauth::OAuthServer;
use paygate_webhook::{WebhookEvent, WebhookRouter};
use serde_json::{Value, json};

use crate::credential::{Credential, bearer_from_header, resolve as resolve_credential};
use crate::jsonrpc::{INTERNAL_ERROR, INVALID_REQUEST, JsonRpcRequest, JsonRpcResponse, PAYMENT_REQUIRED, is_credential_exempt};
use crate::session::SessionManager;

/// Forwards a parsed JSON-RPC request to the upstream tool server and
/// returns its raw response body. Implementations own their own transport
/// (stdio subprocess, remote HTTP, ...); this crate is transport-agnostic.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: &JsonRpcRequest) -> Result<Value, UpstreamError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream transport failure: {0}")]
pub struct UpstreamError(pub String);

/// Inbound context a transport layer (the HTTP server crate) assembles
/// before calling [`ProxyEndpoint::handle_request`].
pub struct RequestContext {
    pub api_key_header: Option<String>,
    pub authorization_header: Option<String>,
    pub session_id_header: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub accept_sse: bool,
}

/// Outcome of a single `POST /mcp` call: the JSON-RPC body plus the
/// session id the caller should see echoed back.
pub struct ProxyResponse {
    pub body: JsonRpcResponse,
    pub session_id: String,
    pub session_created: bool,
}

/// Composes Gate, OAuthServer, WebhookRouter, the audit log, and session
/// lifecycle into the single authenticated request surface (spec §4.7).
pub struct ProxyEndpoint {
    gate: Arc<Gate>,
    oauth: Arc<OAuthServer>,
    webhooks: Arc<WebhookRouter>,
    audit: Arc<dyn AuditStore>,
    sessions: SessionManager,
    upstream: Arc<dyn Upstream>,
    refund_on_upstream_error: bool,
}

impl ProxyEndpoint {
    #[must_use]
    pub fn new(
        gate: Arc<Gate>,
        oauth: Arc<OAuthServer>,
        webhooks: Arc<WebhookRouter>,
        audit: Arc<dyn AuditStore>,
        upstream: Arc<dyn Upstream>,
        refund_on_upstream_error: bool,
    ) -> Self {
        Self {
            gate,
            oauth,
            webhooks,
            audit,
            sessions: SessionManager::new(),
            upstream,
            refund_on_upstream_error,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Overrides the default session cap/idle timeout. Intended to be
    /// chained immediately after [`Self::new`], before the endpoint is shared.
    #[must_use]
    pub fn with_session_limits(mut self, max_sessions: usize, timeout_ms: i64) -> Self {
        self.sessions = SessionManager::with_limits(max_sessions, timeout_ms);
        self
    }

    pub async fn handle_request(&self, request: JsonRpcRequest, ctx: RequestContext) -> ProxyResponse {
        let id = request.id.clone().unwrap_or(Value::Null);

        let (session_id, session_created) = match ctx.session_id_header.as_deref() {
            Some(existing) if self.sessions.touch(existing).is_some() => (existing.to_string(), false),
            _ => {
                let session = self.sessions.create(None);
                (session.id, true)
            }
        };

        let bearer = ctx.authorization_header.as_deref().and_then(bearer_from_header);
        let credential = resolve_credential(ctx.api_key_header.as_deref(), bearer, &self.oauth);

        let body = self.dispatch(&request, credential.as_ref(), ctx.client_ip).await;

        ProxyResponse {
            body: JsonRpcResponse {
                jsonrpc: body.jsonrpc,
                id,
                result: body.result,
                error: body.error,
            },
            session_id,
            session_created,
        }
    }

    async fn dispatch(&self, request: &JsonRpcRequest, credential: Option<&Credential>, client_ip: Option<IpAddr>) -> JsonRpcResponse {
        if request.method != "tools/call" {
            return self.forward_unchecked(request).await;
        }

        let Some(tool) = request.params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(Value::Null, INVALID_REQUEST, "tools/call requires params.name");
        };

        let Some(credential) = credential else {
            if is_credential_exempt(&request.method) {
                return self.forward_unchecked(request).await;
            }
            return JsonRpcResponse::error(Value::Null, PAYMENT_REQUIRED, "payment required: no usable credential");
        };

        let decision = self.gate.evaluate(&credential.api_key, tool, client_ip).await;
        if !decision.allowed {
            let reason = decision.reason.clone().unwrap_or_default();
            self.audit_deny(&credential.api_key, tool, &reason).await;
            self.emit_usage(&credential.api_key, tool, 0, false, Some(&reason)).await;
            return JsonRpcResponse::error(Value::Null, PAYMENT_REQUIRED, format!("payment required: {reason}"));
        }

        match self.upstream.forward(request).await {
            Ok(result) => {
                self.emit_usage(&credential.api_key, tool, decision.credits_charged, true, None).await;
                JsonRpcResponse::success(Value::Null, result)
            }
            Err(err) => {
                if self.refund_on_upstream_error && decision.debit_applied {
                    let _ = self.gate.refund(&credential.api_key, decision.credits_charged, "upstream_error").await;
                }
                self.audit_upstream_error(&credential.api_key, tool, &err.0).await;
                self.emit_usage(&credential.api_key, tool, decision.credits_charged, true, Some("upstream_error")).await;
                JsonRpcResponse::error(Value::Null, INTERNAL_ERROR, format!("upstream error: {}", err.0))
            }
        }
    }

    async fn forward_unchecked(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        match self.upstream.forward(request).await {
            Ok(result) => JsonRpcResponse::success(Value::Null, result),
            Err(err) => JsonRpcResponse::error(Value::Null, INTERNAL_ERROR, format!("upstream error: {}", err.0)),
        }
    }

    async fn audit_deny(&self, key_id: &str, tool: &str, reason: &str) {
        let mut metadata = HashMap::new();
        metadata.insert("tool".to_string(), tool.to_string());
        metadata.insert("reason".to_string(), reason.to_string());
        self.audit
            .record("gate.deny", &mask_identifier(key_id), "admission denied", metadata)
            .await;
    }

    async fn audit_upstream_error(&self, key_id: &str, tool: &str, detail: &str) {
        let mut metadata = HashMap::new();
        metadata.insert("tool".to_string(), tool.to_string());
        metadata.insert("detail".to_string(), detail.to_string());
        self.audit
            .record("gate.upstream_error", &mask_identifier(key_id), "upstream transport failure", metadata)
            .await;
    }

    async fn emit_usage(&self, key_id: &str, tool: &str, credits_charged: paygate_core::Credit, allowed: bool, reason: Option<&str>) {
        let mut payload = json!({
            "tool": tool,
            "creditsCharged": credits_charged,
            "allowed": allowed,
        });
        if let Some(reason) = reason {
            payload["reason"] = Value::from(reason);
        }
        let event = WebhookEvent::new("usage", Some(mask_identifier(key_id)), payload);
        self.webhooks.route(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_audit::InMemoryAuditStore;
    use paygate_ratelimit::{QuotaMeter, RateLimiter, RateLimiterDefaults};
    use paygate_store::{CreateKeyOptions, KeyStore};
    use serde_json::json;

    struct EchoUpstream;

    #[async_trait]
    impl Upstream for EchoUpstream {
        async fn forward(&self, request: &JsonRpcRequest) -> Result<Value, UpstreamError> {
            Ok(json!({ "echoed": request.method }))
        }
    }

    struct FailingUpstream;

    #[async_trait]
    impl Upstream for FailingUpstream {
        async fn forward(&self, _request: &JsonRpcRequest) -> Result<Value, UpstreamError> {
            Err(UpstreamError("connection refused".to_string()))
        }
    }

    fn test_endpoint(upstream: Arc<dyn Upstream>, refund_on_failure: bool) -> (ProxyEndpoint, Arc<KeyStore>) {
        let key_store = Arc::new(KeyStore::new());
        let gate = Arc::new(Gate::new(
            key_store.clone(),
            Arc::new(RateLimiter::new(RateLimiterDefaults::default())),
            Arc::new(QuotaMeter::new()),
            Arc::new(InMemoryAuditStore::new()),
            0,
        ));
        let oauth = Arc::new(OAuthServer::new("https://gate.example.test"));
        let webhooks = Arc::new(WebhookRouter::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let endpoint = ProxyEndpoint::new(gate, oauth, webhooks, audit, upstream, refund_on_failure);
        (endpoint, key_store)
    }

    fn tools_call(tool: &str) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(1)),
            method: "tools/call".to_string(),
            params: json!({ "name": tool }),
        }
    }

    #[tokio::test]
    async fn tools_list_is_forwarded_without_a_credential() {
        let (endpoint, _keys) = test_endpoint(Arc::new(EchoUpstream), true);
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(1)),
            method: "tools/list".to_string(),
            params: Value::Null,
        };
        let ctx = RequestContext {
            api_key_header: None,
            authorization_header: None,
            session_id_header: None,
            client_ip: None,
            accept_sse: false,
        };
        let response = endpoint.handle_request(request, ctx).await;
        assert!(!response.body.is_error());
        assert!(response.session_created);
    }

    #[tokio::test]
    async fn tools_call_without_credential_is_payment_required() {
        let (endpoint, _keys) = test_endpoint(Arc::new(EchoUpstream), true);
        let ctx = RequestContext {
            api_key_header: None,
            authorization_header: None,
            session_id_header: None,
            client_ip: None,
            accept_sse: false,
        };
        let response = endpoint.handle_request(tools_call("search"), ctx).await;
        assert_eq!(response.body.error.unwrap().code, PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn tools_call_with_unknown_key_is_denied() {
        let (endpoint, _keys) = test_endpoint(Arc::new(EchoUpstream), true);
        let ctx = RequestContext {
            api_key_header: Some("pg_unknown".to_string()),
            authorization_header: None,
            session_id_header: None,
            client_ip: None,
            accept_sse: false,
        };
        let response = endpoint.handle_request(tools_call("search"), ctx).await;
        assert_eq!(response.body.error.unwrap().code, PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn successful_call_forwards_and_keeps_session() {
        let (endpoint, key_store) = test_endpoint(Arc::new(EchoUpstream), true);
        let key = key_store.create_key("test key", 100, CreateKeyOptions::default()).expect("key created");
        let ctx = RequestContext {
            api_key_header: Some(key.id.clone()),
            authorization_header: None,
            session_id_header: None,
            client_ip: None,
            accept_sse: false,
        };
        let response = endpoint.handle_request(tools_call("search"), ctx).await;
        assert!(!response.body.is_error());
        let ctx2 = RequestContext {
            api_key_header: Some(key.id),
            authorization_header: None,
            session_id_header: Some(response.session_id.clone()),
            client_ip: None,
            accept_sse: false,
        };
        let response2 = endpoint.handle_request(tools_call("search"), ctx2).await;
        assert!(!response2.session_created);
        assert_eq!(response2.session_id, response.session_id);
    }

    #[tokio::test]
    async fn upstream_failure_triggers_refund() {
        let (endpoint, key_store) = test_endpoint(Arc::new(FailingUpstream), true);
        let key = key_store.create_key("test key", 100, CreateKeyOptions::default()).expect("key created");
        let ctx = RequestContext {
            api_key_header: Some(key.id.clone()),
            authorization_header: None,
            session_id_header: None,
            client_ip: None,
            accept_sse: false,
        };
        let response = endpoint.handle_request(tools_call("search"), ctx).await;
        assert_eq!(response.body.error.unwrap().code, INTERNAL_ERROR);
        let refreshed = key_store.get_key(&key.id).unwrap();
        assert_eq!(refreshed.balance, 100);
    }
}
