//! PKCE (RFC 7636) primitives for the authorization-code flow.
//!
//! All registered providers go through the S256 method; the same random
//! generator mints the CSRF `state` parameter.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A verifier/challenge pair for one authorization flow.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// URL-safe random string, 43 chars (32 random bytes base64url)
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`
    pub challenge: String,
}

impl PkceChallenge {
    /// Mint a fresh pair.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_url_safe();
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// The only challenge method we emit.
    #[must_use]
    pub const fn method() -> &'static str {
        "S256"
    }
}

/// 32 cryptographically random bytes as base64url (43 chars, no padding).
///
/// Satisfies both the RFC 7636 verifier alphabet/length rules and the
/// >=128-bit requirement on `state`.
#[must_use]
pub fn random_url_safe() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derive the S256 challenge for a verifier.
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Mint a CSRF state parameter.
#[must_use]
pub fn generate_state() -> String {
    random_url_safe()
}

/// Constant-time equality for state comparison.
///
/// Length differences return early; content comparison never does.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_shape() {
        let pkce = PkceChallenge::generate();
        // 32 bytes base64url encoded = 43 chars, within the RFC 43-128 bound
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge.len(), 43);
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_challenge_is_deterministic() {
        assert_eq!(challenge_for("abc"), challenge_for("abc"));
        assert_ne!(challenge_for("abc"), challenge_for("abd"));
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let challenge = challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_states_are_unique() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same-state", "same-state"));
        assert!(!constant_time_eq("same-state", "diff-state"));
        assert!(!constant_time_eq("short", "longer-value"));
    }
}
