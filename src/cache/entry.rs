//! Cache entry model and content hashing.
//!
//! An entry never holds the full prompt: only its signature, a short preview
//! and the digest of the response. The response text itself lives in the
//! value map next to the store (see [`super::store::CacheState`]).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::normalize::Signature;

/// Default preview length in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

/// A single cached request/response pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hex SHA-256 of the normalized prompt and context.
    pub key: String,
    /// Significant words of the prompt.
    pub signature: Signature,
    /// Significant words of the context (empty when no context was given).
    #[serde(default)]
    pub context_signature: Signature,
    #[serde(default)]
    pub preview_prompt: String,
    #[serde(default)]
    pub preview_response: String,
    /// Hex SHA-256 of the full response text.
    pub response_digest: String,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds, never earlier than `created_at`.
    pub last_accessed_at: u64,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub strategy_id: String,
    /// Estimated tokens saved each time this entry is served.
    #[serde(default)]
    pub tokens_saved: u32,
}

impl CacheEntry {
    /// Age in milliseconds relative to `now`.
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Milliseconds since the last hit (or creation).
    pub fn idle_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_accessed_at)
    }

    /// `true` once the entry is older than `max_age_secs`.
    pub fn is_expired(&self, now: u64, max_age_secs: u64) -> bool {
        self.age_millis(now) > max_age_secs.saturating_mul(1000)
    }

    /// Record a hit at `now`.
    pub fn touch(&mut self, now: u64) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.last_accessed_at = self.last_accessed_at.max(now);
    }
}

/// Build a deterministic cache key from normalized prompt and context.
///
/// Length-prefixed so that `("a b", "c")` and `("a", "b c")` never collide.
pub fn cache_key(normalized_prompt: &str, normalized_context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((normalized_prompt.len() as u64).to_le_bytes());
    hasher.update(normalized_prompt.as_bytes());
    hasher.update((normalized_context.len() as u64).to_le_bytes());
    hasher.update(normalized_context.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of a response body.
pub fn response_digest(response: &str) -> String {
    hex::encode(Sha256::digest(response.as_bytes()))
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Heuristic token estimate: `words * 1.3 + 4`.
///
/// The constant accounts for message framing overhead.
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count();
    (words as f64 * 1.3 + 4.0) as u32
}

/// Short key prefix for log lines.
pub(crate) fn short_key(key: &str) -> &str {
    key.get(..8).unwrap_or(key)
}

/// Keys are lowercase hex SHA-256 digests.
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_key_respects_char_boundaries() {
        let key = cache_key("list files", "");
        assert_eq!(short_key(&key), &key[..8]);
        assert_eq!(short_key("abc"), "abc");
        // Byte 8 falls inside a two-byte character.
        assert_eq!(short_key("aéééééééé"), "aéééééééé");
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key(&cache_key("list files", "fs")));
        assert!(!is_valid_key("aéééééééé"));
        assert!(!is_valid_key(&"A".repeat(64)));
        assert!(!is_valid_key("abc123"));
    }

    #[test]
    fn test_cache_key_deterministic() {
        assert_eq!(cache_key("list files", "fs"), cache_key("list files", "fs"));
        assert_eq!(cache_key("x", "").len(), 64);
    }

    #[test]
    fn test_cache_key_context_aware() {
        assert_ne!(cache_key("list files", "fs"), cache_key("list files", "net"));
    }

    #[test]
    fn test_cache_key_no_boundary_collision() {
        assert_ne!(cache_key("a b", "c"), cache_key("a", "b c"));
    }

    #[test]
    fn test_response_digest_changes_with_content() {
        assert_ne!(response_digest("ls -la"), response_digest("ls -l"));
        assert_eq!(response_digest("ls -la"), response_digest("ls -la"));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("  short  ", 100), "short");
    }

    #[test]
    fn test_estimate_tokens() {
        // 2 words => 2 * 1.3 + 4 = 6.6 => 6
        assert_eq!(estimate_tokens("ls -la"), 6);
        assert_eq!(estimate_tokens(""), 4);
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry {
            key: "k".into(),
            signature: Signature::default(),
            context_signature: Signature::default(),
            preview_prompt: String::new(),
            preview_response: String::new(),
            response_digest: String::new(),
            created_at: 1_000,
            last_accessed_at: 1_000,
            hit_count: 0,
            tags: BTreeSet::new(),
            strategy_id: "s".into(),
            tokens_saved: 0,
        };
        // max_age 1s: visible at exactly 1s old, expired just after.
        assert!(!entry.is_expired(2_000, 1));
        assert!(entry.is_expired(2_001, 1));
    }

    #[test]
    fn test_missing_required_field_fails_to_deserialize() {
        let json = r#"{"key":"k","signature":[],"created_at":1,"last_accessed_at":1,"strategy_id":"s"}"#;
        assert!(serde_json::from_str::<CacheEntry>(json).is_err());
    }
}
