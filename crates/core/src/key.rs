use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Credit;
use crate::group::{MAX_ACL_ENTRIES, MAX_IP_ALLOWLIST_ENTRIES};
use crate::quota::QuotaPolicy;

/// Lifecycle state of a key.
///
/// Transitions: `Active -> Suspended <-> Active`, `Active -> Expired`
/// (automatic, on the `expires_at` deadline), any state `-> Revoked`
/// (terminal; a revoked key is never re-activated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Suspended,
    Expired,
    Revoked,
}

/// A simple sliding rate-limit override scoped to one key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RateLimitOverride {
    /// Maximum calls allowed per window. 0 means unlimited.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

/// The authoritative caller identity. Owned exclusively by the key store;
/// every other component mutates balance/stats only through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Key {
    /// Opaque identifier, globally unique, `pg_` prefixed.
    pub id: String,
    /// Human-friendly display name.
    pub name: String,
    /// Current spendable balance.
    pub balance: Credit,
    /// Cumulative credits spent over the lifetime of the key.
    pub spent: Credit,
    /// Cumulative successful/attempted call count.
    pub calls: u64,
    /// Lifecycle status.
    pub status: KeyStatus,
    /// Whether the key has been administratively revoked (redundant with
    /// `status == Revoked`, kept as an explicit bit for fast checks).
    pub active: bool,
    /// Optional absolute expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Tools explicitly allowed. Empty means "no restriction".
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Tools explicitly denied.
    #[serde(default)]
    pub denied_tools: Vec<String>,
    /// Per-tool price overrides.
    #[serde(default)]
    pub pricing: HashMap<String, Credit>,
    /// Default price applied when a tool has no override and the group
    /// has none either.
    #[serde(default)]
    pub default_credits: Option<Credit>,
    /// Lifetime spending cap. `None`/`Some(0)` means unbounded.
    #[serde(default)]
    pub spending_limit: Option<Credit>,
    /// IP allowlist (literal or CIDR).
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
    /// Free-form tag map.
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Optional namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Optional group reference.
    #[serde(default)]
    pub group: Option<String>,
    /// Optional per-key quota policy.
    #[serde(default)]
    pub quota: Option<QuotaPolicy>,
    /// Optional per-key rate-limit override.
    #[serde(default)]
    pub rate_limit: Option<RateLimitOverride>,
    /// Human-friendly aliases that resolve to this key, globally unique.
    #[serde(default)]
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Key {
    /// Creates a new, active key with the given initial balance.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, initial_credits: Credit) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            balance: initial_credits,
            spent: 0,
            calls: 0,
            status: KeyStatus::Active,
            active: true,
            expires_at: None,
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            pricing: HashMap::new(),
            default_credits: None,
            spending_limit: None,
            ip_allowlist: Vec::new(),
            tags: HashMap::new(),
            namespace: None,
            group: None,
            quota: None,
            rate_limit: None,
            aliases: Vec::new(),
            created_at: now,
            last_used_at: None,
        }
    }

    /// Clamps array fields to their documented caps.
    pub fn clamp(&mut self) {
        self.allowed_tools.truncate(MAX_ACL_ENTRIES);
        self.denied_tools.truncate(MAX_ACL_ENTRIES);
        self.ip_allowlist.truncate(MAX_IP_ALLOWLIST_ENTRIES);
    }

    /// Whether `expires_at` has passed, given the current time. A key with
    /// no expiry is never expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Applies the automatic `Active -> Expired` transition if applicable.
    /// Revoked keys are terminal and are never touched.
    pub fn refresh_expiry(&mut self, now: DateTime<Utc>) {
        if self.status == KeyStatus::Active && self.is_expired(now) {
            self.status = KeyStatus::Expired;
        }
    }

    /// Suspends the key. A no-op if the key is already revoked.
    pub fn suspend(&mut self) {
        if self.status != KeyStatus::Revoked {
            self.status = KeyStatus::Suspended;
        }
    }

    /// Resumes a suspended key back to active. A no-op on revoked keys.
    pub fn resume(&mut self) {
        if self.status == KeyStatus::Suspended {
            self.status = KeyStatus::Active;
        }
    }

    /// Revokes the key permanently. Terminal: never reversible.
    pub fn revoke(&mut self) {
        self.status = KeyStatus::Revoked;
        self.active = false;
    }
}
