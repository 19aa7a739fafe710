//! Password hashing and verification for protected records.
//!
//! Stored format is `sha256$<base64 salt>$<base64 digest>` with a random
//! 16-byte salt. Verification is constant-time. Stored values that do not
//! match the recognized format fall back to a plaintext equality check:
//! records created before hashing was introduced carried raw passwords.
//! That fallback is a one-time migration path, not a mode to extend; every
//! hit is logged as deprecated.

use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

/// Hash a plaintext password with a fresh random salt.
pub fn hash_password(plain: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = salted_digest(&salt, plain);
    format!(
        "{}${}${}",
        SCHEME,
        general_purpose::STANDARD.encode(salt),
        general_purpose::STANDARD.encode(digest)
    )
}

/// Verify a supplied password against a stored value.
///
/// Recognized hashes are compared in constant time. Anything else is treated
/// as a legacy plaintext value and compared directly (also constant-time).
pub fn verify_password(supplied: &str, stored: &str) -> bool {
    match parse_stored(stored) {
        Some((salt, digest)) => {
            let candidate = salted_digest(&salt, supplied);
            candidate.ct_eq(&digest).into()
        }
        None => {
            tracing::warn!(
                "stored password is not in hashed format; falling back to \
                 deprecated plaintext comparison, rehash at upgrade"
            );
            supplied.as_bytes().ct_eq(stored.as_bytes()).into()
        }
    }
}

/// Whether a stored value is in the recognized hash format.
pub fn is_hashed(stored: &str) -> bool {
    parse_stored(stored).is_some()
}

fn salted_digest(salt: &[u8], plain: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(plain.as_bytes());
    hasher.finalize().to_vec()
}

fn parse_stored(stored: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut parts = stored.splitn(3, '$');
    if parts.next()? != SCHEME {
        return None;
    }
    let salt = general_purpose::STANDARD.decode(parts.next()?).ok()?;
    let digest = general_purpose::STANDARD.decode(parts.next()?).ok()?;
    if salt.len() != SALT_LEN || digest.len() != 32 {
        return None;
    }
    Some((salt, digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrip() {
        let stored = hash_password("hunter2");
        assert!(is_hashed(&stored));
        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("hunter3", &stored));
        assert!(!verify_password("", &stored));
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn legacy_plaintext_fallback() {
        assert!(!is_hashed("letmein"));
        assert!(verify_password("letmein", "letmein"));
        assert!(!verify_password("wrong", "letmein"));
    }

    #[test]
    fn malformed_hash_is_treated_as_plaintext() {
        assert!(!is_hashed("sha256$notbase64!$x"));
        assert!(verify_password(
            "sha256$notbase64!$x",
            "sha256$notbase64!$x"
        ));
    }
}
