use std::collections::HashMap;

use chrono::Utc;
use dashmap::DashMap;
use paygate_core::group::Group;
use paygate_core::key::{Key, KeyStatus, RateLimitOverride};
use paygate_core::quota::QuotaPolicy;
use paygate_core::{Credit, generate_id, pagination};

use crate::error::KeyStoreError;
use crate::persistence::CoalescingSaver;

/// Upper bound on the number of keys the store will hold.
pub const MAX_KEYS: usize = 100_000;

/// Upper bound on the number of groups.
pub const MAX_GROUPS: usize = 10_000;

/// Options accepted by [`KeyStore::create_key`].
#[derive(Debug, Clone, Default)]
pub struct CreateKeyOptions {
    pub allowed_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    pub pricing: HashMap<String, Credit>,
    pub default_credits: Option<Credit>,
    pub ip_allowlist: Vec<String>,
    pub tags: HashMap<String, String>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub namespace: Option<String>,
    pub spending_limit: Option<Credit>,
    pub quota: Option<QuotaPolicy>,
    pub rate_limit: Option<RateLimitOverride>,
    pub group: Option<String>,
}

/// A patch applied via [`KeyStore::update_meta`]. `None` fields are left
/// untouched; `Some` fields (including `Some(None)`-style clears, modeled
/// as `Clear` variants where needed) overwrite the existing value.
#[derive(Debug, Clone, Default)]
pub struct KeyPatch {
    pub name: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub denied_tools: Option<Vec<String>>,
    pub pricing: Option<HashMap<String, Credit>>,
    pub tags: Option<HashMap<String, String>>,
    pub quota: Option<QuotaPolicy>,
    pub spending_limit: Option<Credit>,
    pub expires_at: Option<Option<chrono::DateTime<Utc>>>,
    pub namespace: Option<Option<String>>,
    pub group: Option<Option<String>>,
    pub ip_allowlist: Option<Vec<String>>,
    pub rate_limit: Option<Option<RateLimitOverride>>,
}

/// Sort order for [`KeyStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySort {
    Name,
    Credits,
    #[default]
    CreatedAtDesc,
}

/// Filters accepted by [`KeyStore::list`].
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    pub namespace: Option<String>,
    pub group: Option<String>,
    pub active: Option<bool>,
    pub suspended: Option<bool>,
    pub expired: Option<bool>,
    pub name_prefix: Option<String>,
    pub min_credits: Option<Credit>,
    pub max_credits: Option<Credit>,
    pub sort: KeySort,
}

/// Paginated list result.
#[derive(Debug, Clone)]
pub struct KeyPage {
    pub keys: Vec<Key>,
    pub total: usize,
    pub offset: u64,
    pub limit: u32,
    pub has_more: bool,
}

/// How [`KeyStore::import`] resolves id collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Skip,
    Overwrite,
    Error,
}

/// Snapshot persisted to disk. Aliases and groups are derivable from the
/// key records themselves except for group definitions, which are stored
/// alongside.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct KeyStoreSnapshot {
    pub keys: Vec<Key>,
    pub groups: Vec<Group>,
}

/// Owns every [`Key`] record and every [`Group`]. All mutation goes through
/// this type; `Gate` only borrows references and mutates balances by
/// calling in here.
pub struct KeyStore {
    keys: DashMap<String, Key>,
    aliases: DashMap<String, String>,
    groups: DashMap<String, Group>,
    saver: Option<CoalescingSaver>,
}

impl KeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
            aliases: DashMap::new(),
            groups: DashMap::new(),
            saver: None,
        }
    }

    /// Enables atomic-rename persistence to `path`; `load` should be called
    /// once at startup before serving traffic.
    #[must_use]
    pub fn with_persistence(path: std::path::PathBuf) -> Self {
        let mut store = Self::new();
        store.saver = Some(CoalescingSaver::new(path));
        store
    }

    /// Loads a snapshot from `path` if present; tolerates an absent or
    /// empty file.
    pub fn load(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(snapshot) = crate::persistence::load_json::<KeyStoreSnapshot>(path)? {
            self.restore(snapshot);
        }
        Ok(())
    }

    fn restore(&self, snapshot: KeyStoreSnapshot) {
        self.keys.clear();
        self.aliases.clear();
        self.groups.clear();
        for key in snapshot.keys {
            for alias in &key.aliases {
                self.aliases.insert(alias.clone(), key.id.clone());
            }
            self.keys.insert(key.id.clone(), key);
        }
        for group in snapshot.groups {
            self.groups.insert(group.name.clone(), group);
        }
    }

    fn snapshot(&self) -> KeyStoreSnapshot {
        KeyStoreSnapshot {
            keys: self.keys.iter().map(|e| e.value().clone()).collect(),
            groups: self.groups.iter().map(|e| e.value().clone()).collect(),
        }
    }

    fn request_save(&self) {
        if let Some(saver) = &self.saver {
            let keys = self.keys.clone();
            let groups = self.groups.clone();
            saver.request_save(move || KeyStoreSnapshot {
                keys: keys.iter().map(|e| e.value().clone()).collect(),
                groups: groups.iter().map(|e| e.value().clone()).collect(),
            });
        }
    }

    /// Creates a new active key with a fresh `pg_`-prefixed identifier.
    pub fn create_key(
        &self,
        name: impl Into<String>,
        initial_credits: Credit,
        options: CreateKeyOptions,
    ) -> Result<Key, KeyStoreError> {
        if self.keys.len() >= MAX_KEYS {
            return Err(KeyStoreError::MaxKeysExceeded);
        }
        let id = generate_id("pg", 16);
        let mut key = Key::new(id, name, initial_credits);
        self.apply_options(&mut key, options);
        self.keys.insert(key.id.clone(), key.clone());
        self.request_save();
        Ok(key)
    }

    /// Creates a key with a caller-supplied identifier, for bulk import.
    pub fn import_key(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        credits: Credit,
        options: CreateKeyOptions,
    ) -> Result<Key, KeyStoreError> {
        let id = id.into();
        if self.keys.contains_key(&id) {
            return Err(KeyStoreError::Conflict(format!("key {id} already exists")));
        }
        if self.keys.len() >= MAX_KEYS {
            return Err(KeyStoreError::MaxKeysExceeded);
        }
        let mut key = Key::new(id, name, credits);
        self.apply_options(&mut key, options);
        self.keys.insert(key.id.clone(), key.clone());
        self.request_save();
        Ok(key)
    }

    fn apply_options(&self, key: &mut Key, options: CreateKeyOptions) {
        key.allowed_tools = options.allowed_tools;
        key.denied_tools = options.denied_tools;
        key.pricing = options.pricing;
        key.default_credits = options.default_credits;
        key.ip_allowlist = options.ip_allowlist;
        key.tags = options.tags;
        key.expires_at = options.expires_at;
        key.namespace = options.namespace;
        key.spending_limit = options.spending_limit;
        key.quota = options.quota;
        key.rate_limit = options.rate_limit;
        key.group = options.group;
        key.clamp();
    }

    /// Resolves an identifier or alias to a key record, refreshing its
    /// automatic expiry transition first.
    #[must_use]
    pub fn get_key(&self, identifier_or_alias: &str) -> Option<Key> {
        let id = self
            .aliases
            .get(identifier_or_alias)
            .map(|e| e.value().clone())
            .unwrap_or_else(|| identifier_or_alias.to_string());
        let mut entry = self.keys.get_mut(&id)?;
        entry.refresh_expiry(Utc::now());
        Some(entry.clone())
    }

    #[must_use]
    pub fn get_group(&self, name: &str) -> Option<Group> {
        self.groups.get(name).map(|e| e.value().clone())
    }

    /// Atomically debits `amount` from `key`. The per-shard lock DashMap
    /// holds for the duration of `get_mut` is the per-key mutex called out
    /// in the design notes.
    pub fn debit(&self, key_id: &str, amount: Credit) -> Result<Credit, KeyStoreError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        if entry.balance < amount {
            return Err(KeyStoreError::InsufficientCredits {
                available: entry.balance,
                requested: amount,
            });
        }
        entry.balance -= amount;
        entry.spent += amount;
        entry.calls += 1;
        entry.last_used_at = Some(Utc::now());
        let balance = entry.balance;
        drop(entry);
        self.request_save();
        Ok(balance)
    }

    /// Adds `amount` back to `key`'s balance and decrements `spent`.
    /// Succeeds whenever the key still exists.
    pub fn refund(&self, key_id: &str, amount: Credit) -> Result<Credit, KeyStoreError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        entry.balance += amount;
        entry.spent = entry.spent.saturating_sub(amount);
        let balance = entry.balance;
        drop(entry);
        self.request_save();
        Ok(balance)
    }

    /// Adds credits without touching `spent` (an admin top-up).
    pub fn topup(&self, key_id: &str, amount: Credit) -> Result<Credit, KeyStoreError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        entry.balance += amount;
        let balance = entry.balance;
        drop(entry);
        self.request_save();
        Ok(balance)
    }

    pub fn update_meta(&self, key_id: &str, patch: KeyPatch) -> Result<Key, KeyStoreError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        if let Some(name) = patch.name {
            entry.name = name;
        }
        if let Some(v) = patch.allowed_tools {
            entry.allowed_tools = v;
        }
        if let Some(v) = patch.denied_tools {
            entry.denied_tools = v;
        }
        if let Some(v) = patch.pricing {
            entry.pricing = v;
        }
        if let Some(v) = patch.tags {
            entry.tags = v;
        }
        if let Some(v) = patch.quota {
            entry.quota = Some(v);
        }
        if let Some(v) = patch.spending_limit {
            entry.spending_limit = Some(v);
        }
        if let Some(v) = patch.expires_at {
            entry.expires_at = v;
        }
        if let Some(v) = patch.namespace {
            entry.namespace = v;
        }
        if let Some(v) = patch.group {
            entry.group = v;
        }
        if let Some(v) = patch.ip_allowlist {
            entry.ip_allowlist = v;
        }
        if let Some(v) = patch.rate_limit {
            entry.rate_limit = v;
        }
        entry.clamp();
        let updated = entry.clone();
        drop(entry);
        self.request_save();
        Ok(updated)
    }

    /// Suspends a key. A no-op on an already-revoked key.
    pub fn suspend(&self, key_id: &str) -> Result<(), KeyStoreError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        entry.suspend();
        drop(entry);
        self.request_save();
        Ok(())
    }

    pub fn resume(&self, key_id: &str) -> Result<(), KeyStoreError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        entry.resume();
        drop(entry);
        self.request_save();
        Ok(())
    }

    /// Sets `active = false`; the record is kept for audit.
    pub fn revoke(&self, key_id: &str) -> Result<(), KeyStoreError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        entry.revoke();
        drop(entry);
        self.request_save();
        Ok(())
    }

    /// Admin-only hard delete. Removes aliases too.
    pub fn delete(&self, key_id: &str) -> Result<(), KeyStoreError> {
        let (_, key) = self
            .keys
            .remove(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        for alias in key.aliases {
            self.aliases.remove(&alias);
        }
        self.request_save();
        Ok(())
    }

    pub fn register_alias(&self, key_id: &str, alias: &str) -> Result<(), KeyStoreError> {
        if self.aliases.contains_key(alias) || self.keys.contains_key(alias) {
            return Err(KeyStoreError::Conflict(format!("alias {alias} already in use")));
        }
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        entry.aliases.push(alias.to_string());
        drop(entry);
        self.aliases.insert(alias.to_string(), key_id.to_string());
        self.request_save();
        Ok(())
    }

    pub fn remove_alias(&self, key_id: &str, alias: &str) -> Result<(), KeyStoreError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        entry.aliases.retain(|a| a != alias);
        drop(entry);
        self.aliases.remove(alias);
        self.request_save();
        Ok(())
    }

    /// Lists keys, applying filters, sort, and pagination clamping.
    #[must_use]
    pub fn list(&self, filter: &KeyFilter, limit: Option<u32>, offset: Option<i64>) -> KeyPage {
        let now = Utc::now();
        let mut matched: Vec<Key> = self
            .keys
            .iter()
            .map(|e| {
                let mut k = e.value().clone();
                k.refresh_expiry(now);
                k
            })
            .filter(|k| {
                filter.namespace.as_ref().is_none_or(|ns| k.namespace.as_deref() == Some(ns.as_str()))
                    && filter.group.as_ref().is_none_or(|g| k.group.as_deref() == Some(g.as_str()))
                    && filter.active.is_none_or(|a| k.active == a)
                    && filter
                        .suspended
                        .is_none_or(|s| (k.status == KeyStatus::Suspended) == s)
                    && filter
                        .expired
                        .is_none_or(|ex| (k.status == KeyStatus::Expired) == ex)
                    && filter.name_prefix.as_ref().is_none_or(|p| {
                        k.name.to_lowercase().starts_with(&p.to_lowercase())
                    })
                    && filter.min_credits.is_none_or(|m| k.balance >= m)
                    && filter.max_credits.is_none_or(|m| k.balance <= m)
            })
            .collect();

        match filter.sort {
            KeySort::Name => matched.sort_by(|a, b| a.name.cmp(&b.name)),
            KeySort::Credits => matched.sort_by(|a, b| b.balance.cmp(&a.balance)),
            KeySort::CreatedAtDesc => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        let total = matched.len();
        let limit_value = pagination::clamp_limit(limit);
        let offset_value = pagination::clamp_offset(offset);
        let page: Vec<Key> = matched
            .into_iter()
            .skip(offset_value as usize)
            .take(limit_value as usize)
            .collect();
        let has_more = offset_value + u64::from(limit_value) < total as u64;

        KeyPage {
            keys: page,
            total,
            offset: offset_value,
            limit: limit_value,
            has_more,
        }
    }

    /// Exports every key record as-is (for backup/migration).
    #[must_use]
    pub fn export(&self) -> Vec<Key> {
        self.keys.iter().map(|e| e.value().clone()).collect()
    }

    /// Imports a batch of key records according to `mode`.
    pub fn import(&self, records: Vec<Key>, mode: ImportMode) -> Result<usize, KeyStoreError> {
        let mut imported = 0;
        for key in records {
            match (self.keys.contains_key(&key.id), mode) {
                (true, ImportMode::Skip) => continue,
                (true, ImportMode::Error) => {
                    return Err(KeyStoreError::Conflict(format!(
                        "key {} already exists",
                        key.id
                    )));
                }
                _ => {}
            }
            for alias in &key.aliases {
                self.aliases.insert(alias.clone(), key.id.clone());
            }
            self.keys.insert(key.id.clone(), key);
            imported += 1;
        }
        self.request_save();
        Ok(imported)
    }

    pub fn create_group(&self, group: Group) -> Result<Group, KeyStoreError> {
        if self.groups.len() >= MAX_GROUPS {
            return Err(KeyStoreError::Conflict("maximum group count exceeded".into()));
        }
        let mut group = group;
        group.clamp();
        self.groups.insert(group.name.clone(), group.clone());
        self.request_save();
        Ok(group)
    }

    pub fn delete_group(&self, name: &str) -> Result<(), KeyStoreError> {
        self.groups
            .remove(name)
            .ok_or_else(|| KeyStoreError::GroupNotFound(name.to_string()))?;
        self.request_save();
        Ok(())
    }

    pub fn list_groups(&self) -> Vec<Group> {
        self.groups.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}
