use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use paygate_audit::InMemoryAuditStore;
use paygate_gate::Gate;
use paygate_oauth::OAuthServer;
use paygate_proxy::ProxyEndpoint;
use paygate_ratelimit::{QuotaMeter, RateLimiter, RateLimiterDefaults};
use paygate_server::config::PaygateConfig;
use paygate_server::state::AppState;
use paygate_server::upstream::HttpUpstream;
use paygate_store::KeyStore;
use paygate_webhook::WebhookRouter;

/// Payment-gated reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "paygate-server", about = "Payment-gated reverse proxy in front of a JSON-RPC tool server")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "paygate.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PaygateConfig::load(&cli.config)?;

    let state_path = PathBuf::from(&config.state_path);
    let key_store = Arc::new(KeyStore::with_persistence(state_path.clone()));
    if let Err(e) = key_store.load(&state_path) {
        tracing::warn!(error = %e, path = %state_path.display(), "failed to load persisted key store state");
    }

    let oauth_state_path = state_path.with_file_name(format!(
        "{}.oauth.json",
        state_path.file_stem().and_then(|s| s.to_str()).unwrap_or("paygate")
    ));
    let oauth = Arc::new(OAuthServer::with_persistence(&config.issuer, oauth_state_path.clone()));
    if let Err(e) = oauth.load(&oauth_state_path) {
        tracing::warn!(error = %e, path = %oauth_state_path.display(), "failed to load persisted OAuth state");
    }

    let rate_limiter = Arc::new(RateLimiter::new(RateLimiterDefaults::default()));
    let quota_meter = Arc::new(QuotaMeter::new());
    let audit: Arc<dyn paygate_audit::AuditStore> = Arc::new(InMemoryAuditStore::new());
    let gate = Arc::new(Gate::with_global_quota(
        key_store.clone(),
        rate_limiter.clone(),
        quota_meter.clone(),
        audit.clone(),
        config.default_credits,
        config.global_quota.clone(),
    ));
    let webhooks = Arc::new(WebhookRouter::new());
    webhooks.set_default_url(config.webhook_default_url.clone());

    let upstream: Arc<dyn paygate_proxy::Upstream> = match &config.upstream_url {
        Some(url) => Arc::new(HttpUpstream::new(url.clone(), Duration::from_millis(config.request_timeout_ms))),
        None => {
            tracing::warn!("no upstream_url configured; all tool calls will fail");
            Arc::new(HttpUpstream::new("http://127.0.0.1:0", Duration::from_millis(config.request_timeout_ms)))
        }
    };

    let proxy = Arc::new(
        ProxyEndpoint::new(gate.clone(), oauth.clone(), webhooks.clone(), audit.clone(), upstream, config.refund_on_upstream_error)
            .with_session_limits(config.max_sessions, config.session_timeout_ms),
    );

    let app_state = AppState {
        config: Arc::new(config.clone()),
        key_store,
        rate_limiter,
        quota_meter,
        gate,
        oauth: oauth.clone(),
        webhooks: webhooks.clone(),
        audit,
        proxy: proxy.clone(),
        maintenance_mode: Arc::new(AtomicBool::new(config.maintenance_mode)),
    };

    spawn_background_tasks(oauth, webhooks, proxy);

    let app = paygate_server::routes::router(app_state);

    let host = cli.host.unwrap_or(config.host);
    let port = cli.port.unwrap_or(config.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "paygate-server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("paygate-server shut down");
    Ok(())
}

fn spawn_background_tasks(oauth: Arc<OAuthServer>, webhooks: Arc<WebhookRouter>, proxy: Arc<ProxyEndpoint>) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(300));
        timer.tick().await;
        loop {
            timer.tick().await;
            oauth.cleanup_sweep();
        }
    });

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(30));
        timer.tick().await;
        loop {
            timer.tick().await;
            webhooks.process_due_all().await;
        }
    });

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(60));
        timer.tick().await;
        loop {
            timer.tick().await;
            proxy.sessions().expire_idle();
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
