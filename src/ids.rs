//! Deterministic canonical identifiers.
//!
//! An id is `provider:prefix:<key>` where the key is the sanitized
//! provider-native id when one exists, otherwise a truncated SHA-256 of a
//! fallback seed built from the record's content.

use sha2::{Digest, Sha256};

/// Hex characters kept from the fallback hash.
pub const FALLBACK_HASH_LEN: usize = 24;

pub const CONVERSATION: &str = "conv";
pub const MESSAGE: &str = "msg";
pub const ATTACHMENT: &str = "att";

/// Build a canonical id. Never fails and has no side effects.
pub fn make_id(prefix: &str, provider: &str, raw_id: Option<&str>, fallback_seed: &str) -> String {
    match raw_id.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => format!("{}:{}:{}", provider, prefix, sanitize(raw)),
        None => format!("{}:{}:{}", provider, prefix, seed_hash(fallback_seed)),
    }
}

/// Map every character outside `[A-Za-z0-9_-]` to `_`.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Truncated hex SHA-256 of a seed string.
pub fn seed_hash(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FALLBACK_HASH_LEN);
    hex
}

/// Fallback seed for a message without a provider-native id.
pub fn message_seed(
    conversation_id: &str,
    ordinal: usize,
    role: &str,
    text: &str,
    timestamp: Option<&str>,
) -> String {
    format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
        conversation_id,
        ordinal,
        role,
        text,
        timestamp.unwrap_or("")
    )
}
