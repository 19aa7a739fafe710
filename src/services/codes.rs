//! Short-code generation.
//!
//! Codes are drawn from an uppercase-letters-plus-digits alphabet at a fixed
//! configured length. Uniqueness is not decided here: the caller inserts the
//! candidate and relies on the storage layer's partial unique index, retrying
//! on collision up to [`MAX_ALLOCATION_ATTEMPTS`].

use rand::Rng;

/// Alphabet used for generated codes. Custom caller-supplied codes are not
/// restricted to this alphabet.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Upper bound on generate-and-insert attempts before the allocator gives up
/// with `AllocationExhausted`. At 5 characters over a 36-symbol alphabet the
/// collision probability makes hitting this cap effectively a signal that the
/// code space is saturated, not bad luck.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 32;

/// Longest code accepted from callers. Generated codes are far shorter; this
/// bounds custom codes so they stay typeable and indexable.
pub const MAX_CODE_LEN: usize = 64;

/// Draw one random candidate code of `length` characters.
pub fn random_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Validate a caller-supplied custom code.
///
/// Content is intentionally unrestricted beyond being non-empty, within
/// length bounds, and free of characters that would break logging or URLs.
/// Comparison against existing codes is exact-byte, never case-folded.
pub fn validate_custom_code(code: &str) -> bool {
    if code.is_empty() || code.len() > MAX_CODE_LEN {
        return false;
    }
    !code
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || c == '/')
}
