use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use paygate_audit::AuditStore;
use paygate_gate::Gate;
use paygate_oauth::OAuthServer;
use paygate_proxy::ProxyEndpoint;
use paygate_ratelimit::{QuotaMeter, RateLimiter};
use paygate_store::KeyStore;
use paygate_webhook::WebhookRouter;

use crate::config::PaygateConfig;

/// Everything an axum handler needs, shared across requests via `Clone`
/// (every field is already reference-counted or internally synchronized).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PaygateConfig>,
    pub key_store: Arc<KeyStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub quota_meter: Arc<QuotaMeter>,
    pub gate: Arc<Gate>,
    pub oauth: Arc<OAuthServer>,
    pub webhooks: Arc<WebhookRouter>,
    pub audit: Arc<dyn AuditStore>,
    pub proxy: Arc<ProxyEndpoint>,
    pub maintenance_mode: Arc<AtomicBool>,
}

impl AppState {
    #[must_use]
    pub fn is_under_maintenance(&self) -> bool {
        self.maintenance_mode.load(Ordering::Relaxed)
    }

    pub fn set_maintenance_mode(&self, enabled: bool) {
        self.maintenance_mode.store(enabled, Ordering::Relaxed);
    }
}
