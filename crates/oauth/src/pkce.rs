use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Verifies an RFC 7636 S256 PKCE pair: `challenge == base64url(sha256(verifier))`.
#[must_use]
pub fn verify_s256(verifier: &str, challenge: &str) -> bool {
    let digest = Sha256::digest(verifier.as_bytes());
    let computed = URL_SAFE_NO_PAD.encode(digest);
    computed == challenge
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_verifier_and_challenge_succeeds() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        assert!(verify_s256(verifier, &challenge));
    }

    #[test]
    fn mismatched_verifier_fails() {
        assert!(!verify_s256("wrong-verifier", "deadbeef"));
    }
}
