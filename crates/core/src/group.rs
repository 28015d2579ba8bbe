use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Credit;
use crate::quota::QuotaPolicy;

/// Maximum number of entries an ACL array is allowed to carry before being
/// silently clamped (DoS defense, not a rejection).
pub const MAX_ACL_ENTRIES: usize = 1000;

/// Maximum number of IP allowlist entries.
pub const MAX_IP_ALLOWLIST_ENTRIES: usize = 200;

/// A named policy bundle referenced by zero or more keys.
///
/// Policy resolution (see [`crate::acl`]): key-provided non-empty values win;
/// otherwise the group value applies; deny-lists and IP allowlists are
/// unioned rather than overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Group {
    /// Group name, unique among groups.
    pub name: String,
    /// Tools allowed for keys in this group. Empty means "no restriction".
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Tools denied for keys in this group.
    #[serde(default)]
    pub denied_tools: Vec<String>,
    /// Per-tool credit price overrides.
    #[serde(default)]
    pub pricing: HashMap<String, Credit>,
    /// Default price applied when a tool has no specific override.
    #[serde(default)]
    pub default_credits: Option<Credit>,
    /// Spending limit shared by keys that don't set their own.
    #[serde(default)]
    pub spending_limit: Option<Credit>,
    /// IP allowlist (literal addresses or CIDR blocks).
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
    /// Quota shared by keys that don't set their own.
    #[serde(default)]
    pub quota: Option<QuotaPolicy>,
}

impl Group {
    /// Creates an empty, unrestricted group with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            pricing: HashMap::new(),
            default_credits: None,
            spending_limit: None,
            ip_allowlist: Vec::new(),
            quota: None,
        }
    }

    /// Clamps array fields to their documented caps. Overflow is truncated,
    /// never rejected.
    pub fn clamp(&mut self) {
        self.allowed_tools.truncate(MAX_ACL_ENTRIES);
        self.denied_tools.truncate(MAX_ACL_ENTRIES);
        self.ip_allowlist.truncate(MAX_IP_ALLOWLIST_ENTRIES);
    }
}
