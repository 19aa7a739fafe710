//! Anonymous session correlation.
//!
//! Uploads are tied to their caller with an opaque token so the caller can
//! later list its own records. The token carries no authentication weight:
//! any holder can list records created under it. Validity checks are purely
//! structural (length and character set), which is an accepted tradeoff
//! since the token confers nothing beyond listing.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Tokens are SHA-256 hex digests: 64 lowercase hex characters.
pub const TOKEN_LEN: usize = 64;

/// Reuse a presented token when it looks valid, otherwise mint a fresh one.
pub fn identify(existing: Option<&str>) -> String {
    match existing {
        Some(token) if is_valid_token(token) => token.to_string(),
        _ => mint(),
    }
}

/// Structural validity: correct length, lowercase hex only. Does not prove
/// the token was ever issued by this system.
pub fn is_valid_token(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn mint() -> String {
    let mut random = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random);
    let mut hasher = Sha256::new();
    hasher.update(random);
    hex::encode(hasher.finalize())
}
