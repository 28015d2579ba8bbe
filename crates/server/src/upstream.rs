use std::time::Duration;

use async_trait::async_trait;
use paygate_proxy::{JsonRpcRequest, Upstream, UpstreamError};
use serde_json::Value;

/// Forwards JSON-RPC requests to a remote HTTP tool server, matching the
/// "remote HTTP" transport option named in the proxy endpoint contract.
pub struct HttpUpstream {
    client: reqwest::Client,
    url: String,
}

impl HttpUpstream {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: &JsonRpcRequest) -> Result<Value, UpstreamError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| UpstreamError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UpstreamError(format!("upstream returned status {}", response.status())));
        }

        let body: Value = response.json().await.map_err(|e| UpstreamError(e.to_string()))?;
        if body.get("error").is_some_and(|e| !e.is_null()) {
            return Err(UpstreamError(body["error"].to_string()));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}
