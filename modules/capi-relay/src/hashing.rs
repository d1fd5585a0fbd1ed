//! PII hashing
//!
//! Email addresses and phone numbers are normalized and reduced to a
//! SHA-256 hex digest before they leave the service. The upstream matches
//! on the digest, so the same normalized input must always produce the
//! same output.

use sha2::{Digest, Sha256};

const SHA256_HEX_LEN: usize = 64;

/// Hash a free-form PII value (email, name, ...).
///
/// Returns `None` for missing, empty, or whitespace-only input. The value
/// is trimmed and lowercased before hashing.
pub fn hash_pii(value: Option<&str>) -> Option<String> {
    let normalized = normalize(value?)?;
    Some(digest_or_passthrough(&normalized))
}

/// Hash a phone number.
///
/// After the common normalization every non-digit is dropped, so
/// `"+1 (555) 010-2030"` and `"15550102030"` hash identically. A value
/// without any digits yields `None`.
pub fn hash_phone(value: Option<&str>) -> Option<String> {
    let normalized = normalize(value?)?;
    if is_sha256_hex(&normalized) {
        return Some(normalized);
    }

    let digits: String = normalized.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    Some(sha256_hex(&digits))
}

fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

// Callers that hash on the client side send the digest itself.
fn digest_or_passthrough(normalized: &str) -> String {
    if is_sha256_hex(normalized) {
        normalized.to_string()
    } else {
        sha256_hex(normalized)
    }
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
