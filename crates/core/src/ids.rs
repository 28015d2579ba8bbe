use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generates an opaque identifier of the form `{prefix}_{hex}`.
///
/// `bytes` random bytes are drawn from the OS RNG and hex-encoded, matching
/// the `pg_` key / `pg_at_` / `pg_rt_` / `pg_client_` / `pg_secret_` formats.
#[must_use]
pub fn generate_id(prefix: &str, bytes: usize) -> String {
    let mut buf = vec![0_u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    format!("{prefix}_{}", hex::encode(buf))
}

/// SHA-256 hex digest of a secret, used to store credentials at rest without
/// keeping the raw value.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Masks an identifier for audit logs: first 7-8 prefix characters, `...`,
/// last 3-4 characters. Short identifiers are masked entirely.
#[must_use]
pub fn mask_identifier(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    let len = chars.len();
    if len <= 12 {
        return "*".repeat(len);
    }
    let prefix_len = if len >= 40 { 8 } else { 7 };
    let suffix_len = if len >= 24 { 4 } else { 3 };
    let prefix: String = chars[..prefix_len].iter().collect();
    let suffix: String = chars[len - suffix_len..].iter().collect();
    format!("{prefix}...{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_id_has_prefix_and_hex_body() {
        let id = generate_id("pg", 16);
        assert!(id.starts_with("pg_"));
        assert_eq!(id.len(), 3 + 32);
        assert!(id[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_id_is_unique() {
        let a = generate_id("pg_at", 24);
        let b = generate_id("pg_at", 24);
        assert_ne!(a, b);
    }

    #[test]
    fn mask_identifier_short_is_fully_masked() {
        let masked = mask_identifier("pg_abc123");
        assert_eq!(masked, "*".repeat(9));
    }

    #[test]
    fn mask_identifier_long_keeps_prefix_and_suffix() {
        let id = "pg_1234567890abcdef1234567890abcdef";
        let masked = mask_identifier(id);
        assert!(masked.starts_with("pg_12345"));
        assert!(masked.ends_with("cdef"));
        assert!(masked.contains("..."));
    }

    #[test]
    fn hash_secret_is_deterministic() {
        assert_eq!(hash_secret("hello"), hash_secret("hello"));
        assert_ne!(hash_secret("hello"), hash_secret("world"));
    }
}
