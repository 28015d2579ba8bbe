use paygate_core::quota::QuotaPolicy;
use serde::Deserialize;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_state_path() -> String {
    "paygate-state.json".to_string()
}

fn default_default_credits() -> u64 {
    1
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_session_timeout_ms() -> i64 {
    30 * 60 * 1_000
}

fn default_max_sessions() -> usize {
    50_000
}

fn default_true() -> bool {
    true
}

/// Top-level configuration, loaded from a TOML file with every field
/// optional and a compiled-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaygateConfig {
    pub host: String,
    pub port: u16,
    /// Path to the authoritative KeyStore/OAuthServer JSON snapshot.
    pub state_path: String,
    pub admin_key: Option<String>,
    pub issuer: String,
    pub upstream_url: Option<String>,
    pub default_credits: u64,
    pub request_timeout_ms: u64,
    pub session_timeout_ms: i64,
    pub max_sessions: usize,
    pub refund_on_upstream_error: bool,
    pub webhook_default_url: Option<String>,
    pub maintenance_mode: bool,
    /// Process-wide quota counted across every key, independent of any
    /// per-key or per-group quota. Zero/absent on every axis means unbounded.
    pub global_quota: QuotaPolicy,
}

impl Default for PaygateConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            state_path: default_state_path(),
            admin_key: None,
            issuer: "https://localhost:8080".to_string(),
            upstream_url: None,
            default_credits: default_default_credits(),
            request_timeout_ms: default_request_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            max_sessions: default_max_sessions(),
            refund_on_upstream_error: default_true(),
            webhook_default_url: None,
            maintenance_mode: false,
            global_quota: QuotaPolicy::default(),
        }
    }
}

impl PaygateConfig {
    /// Loads config from `path`, falling back to compiled-in defaults if
    /// the file does not exist.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if std::path::Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(toml::from_str("")?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_well_formed() {
        let config = PaygateConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.refund_on_upstream_error);
        assert!(!config.maintenance_mode);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: PaygateConfig = toml::from_str("port = 9090\nadmin_key = \"abc\"\n").unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.admin_key.as_deref(), Some("abc"));
        assert_eq!(config.host, default_host());
    }
}
