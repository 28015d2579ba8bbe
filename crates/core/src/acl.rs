use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::Credit;
use crate::group::Group;
use crate::key::Key;
use crate::quota::QuotaPolicy;

/// The policy that actually governs a key, after overlaying its group (if
/// any) per the resolution rules in §4.1:
/// - `allowed_tools`: key value if non-empty, else group value.
/// - `denied_tools`: key ∪ group.
/// - `ip_allowlist`: key ∪ group.
/// - `pricing`: tool-level map merged, key overrides group entry.
/// - `quota`, `default_credits`, `spending_limit`: key if set, else group.
#[derive(Debug, Clone)]
pub struct EffectivePolicy {
    pub allowed_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    pub ip_allowlist: Vec<String>,
    pub pricing: HashMap<String, Credit>,
    pub default_credits: Option<Credit>,
    pub spending_limit: Option<Credit>,
    pub quota: Option<QuotaPolicy>,
}

impl EffectivePolicy {
    /// Resolves the effective policy for `key`, overlaying `group` when present.
    #[must_use]
    pub fn resolve(key: &Key, group: Option<&Group>) -> Self {
        let Some(group) = group else {
            return Self {
                allowed_tools: key.allowed_tools.clone(),
                denied_tools: key.denied_tools.clone(),
                ip_allowlist: key.ip_allowlist.clone(),
                pricing: key.pricing.clone(),
                default_credits: key.default_credits,
                spending_limit: key.spending_limit,
                quota: key.quota.clone(),
            };
        };

        let allowed_tools = if key.allowed_tools.is_empty() {
            group.allowed_tools.clone()
        } else {
            key.allowed_tools.clone()
        };

        let denied_tools = union(&key.denied_tools, &group.denied_tools);
        let ip_allowlist = union(&key.ip_allowlist, &group.ip_allowlist);

        let mut pricing = group.pricing.clone();
        pricing.extend(key.pricing.clone());

        Self {
            allowed_tools,
            denied_tools,
            ip_allowlist,
            pricing,
            default_credits: key.default_credits.or(group.default_credits),
            spending_limit: key.spending_limit.or(group.spending_limit),
            quota: key.quota.clone().or_else(|| group.quota.clone()),
        }
    }

    /// Price for `tool`, falling back from per-tool override to the
    /// default, else to `global_default`. A `tool` of `*` (non-tool-call
    /// request) always charges nothing.
    #[must_use]
    pub fn price_for(&self, tool: &str, global_default: Credit) -> Credit {
        if tool == "*" {
            return 0;
        }
        self.pricing
            .get(tool)
            .copied()
            .or(self.default_credits)
            .unwrap_or(global_default)
    }

    /// Whether `tool` is permitted by the ACL.
    #[must_use]
    pub fn tool_allowed(&self, tool: &str) -> bool {
        if tool == "*" {
            return true;
        }
        if !self.allowed_tools.is_empty() && !self.allowed_tools.iter().any(|t| t == tool) {
            return false;
        }
        !self.denied_tools.iter().any(|t| t == tool)
    }

    /// Whether `ip` matches the allowlist. An empty allowlist permits
    /// everything (the check is only invoked when the caller supplied an
    /// IP and an allowlist is configured).
    #[must_use]
    pub fn ip_allowed(&self, ip: IpAddr) -> bool {
        if self.ip_allowlist.is_empty() {
            return true;
        }
        self.ip_allowlist.iter().any(|entry| {
            if let Ok(net) = entry.parse::<IpNet>() {
                net.contains(&ip)
            } else if let Ok(literal) = entry.parse::<IpAddr>() {
                literal == ip
            } else {
                false
            }
        })
    }
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for item in b {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_acl_wins_over_group_when_non_empty() {
        let mut key = Key::new("pg_1", "k", 10);
        key.allowed_tools = vec!["read_file".into()];
        let mut group = Group::new("g");
        group.allowed_tools = vec!["write_file".into()];
        let policy = EffectivePolicy::resolve(&key, Some(&group));
        assert_eq!(policy.allowed_tools, vec!["read_file".to_string()]);
    }

    #[test]
    fn group_acl_applies_when_key_acl_empty() {
        let key = Key::new("pg_1", "k", 10);
        let mut group = Group::new("g");
        group.allowed_tools = vec!["read_file".into()];
        let policy = EffectivePolicy::resolve(&key, Some(&group));
        assert_eq!(policy.allowed_tools, vec!["read_file".to_string()]);
        assert!(policy.tool_allowed("read_file"));
        assert!(!policy.tool_allowed("write_file"));
    }

    #[test]
    fn denied_tools_are_unioned() {
        let mut key = Key::new("pg_1", "k", 10);
        key.denied_tools = vec!["a".into()];
        let mut group = Group::new("g");
        group.denied_tools = vec!["b".into()];
        let policy = EffectivePolicy::resolve(&key, Some(&group));
        assert!(policy.denied_tools.contains(&"a".to_string()));
        assert!(policy.denied_tools.contains(&"b".to_string()));
    }

    #[test]
    fn pricing_key_override_wins() {
        let mut key = Key::new("pg_1", "k", 10);
        key.pricing.insert("tool_a".into(), 5);
        let mut group = Group::new("g");
        group.pricing.insert("tool_a".into(), 99);
        group.pricing.insert("tool_b".into(), 2);
        let policy = EffectivePolicy::resolve(&key, Some(&group));
        assert_eq!(policy.price_for("tool_a", 1), 5);
        assert_eq!(policy.price_for("tool_b", 1), 2);
    }

    #[test]
    fn wildcard_tool_is_always_free_and_allowed() {
        let key = Key::new("pg_1", "k", 10);
        let policy = EffectivePolicy::resolve(&key, None);
        assert_eq!(policy.price_for("*", 5), 0);
        assert!(policy.tool_allowed("*"));
    }

    #[test]
    fn ip_allowlist_matches_cidr_and_literal() {
        let mut key = Key::new("pg_1", "k", 10);
        key.ip_allowlist = vec!["10.0.0.0/24".into(), "192.168.1.1".into()];
        let policy = EffectivePolicy::resolve(&key, None);
        assert!(policy.ip_allowed("10.0.0.42".parse().unwrap()));
        assert!(policy.ip_allowed("192.168.1.1".parse().unwrap()));
        assert!(!policy.ip_allowed("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn empty_ip_allowlist_permits_everything() {
        let key = Key::new("pg_1", "k", 10);
        let policy = EffectivePolicy::resolve(&key, None);
        assert!(policy.ip_allowed("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn group_quota_applies_when_key_has_none() {
        let key = Key::new("pg_1", "k", 10);
        let mut group = Group::new("g");
        group.quota = Some(QuotaPolicy {
            daily_calls: Some(5),
            ..Default::default()
        });
        let policy = EffectivePolicy::resolve(&key, Some(&group));
        assert_eq!(policy.quota.unwrap().daily_calls, Some(5));
    }

    #[test]
    fn key_quota_wins_over_group_quota() {
        let mut key = Key::new("pg_1", "k", 10);
        key.quota = Some(QuotaPolicy {
            daily_calls: Some(1),
            ..Default::default()
        });
        let mut group = Group::new("g");
        group.quota = Some(QuotaPolicy {
            daily_calls: Some(5),
            ..Default::default()
        });
        let policy = EffectivePolicy::resolve(&key, Some(&group));
        assert_eq!(policy.quota.unwrap().daily_calls, Some(1));
    }
}
