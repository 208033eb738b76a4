//! Text normalization and signature extraction.
//!
//! Every cache path starts here. [`normalize`] produces the canonical form
//! that is hashed into exact keys; [`extract_signature`] reduces normalized
//! text to a small, frequency-ranked set of significant words used for
//! approximate matching. Both are pure, so a persisted signature can always
//! be re-derived and the semantic index rebuilt from it.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Default number of words kept in a signature.
pub const DEFAULT_SIGNATURE_SIZE: usize = 20;

/// Tokens must be longer than this to be significant.
const MIN_TOKEN_CHARS: usize = 2;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "have", "his", "him", "its", "let", "may", "who",
        "did", "get", "got", "this", "that", "with", "from", "into", "than", "then", "them",
        "they", "there", "their", "what", "when", "where", "which", "while", "will", "would",
        "should", "could", "about", "your", "yours", "been", "were", "being", "some", "such",
        "only", "also", "just", "very", "how", "why", "does", "doing", "done", "these",
        "those", "here", "over", "under", "each", "more", "most", "other", "same", "both",
    ]
    .into_iter()
    .collect()
});

/// Lower-case, strip punctuation and collapse whitespace.
///
/// Text is NFKC-folded first so full-width and compatibility characters
/// normalize to their plain forms. Characters other than alphanumerics, `_`
/// and whitespace become a single space.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.nfkc().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Frequency-ranked set of significant words.
///
/// Words are unique and kept in rank order (most frequent first, then
/// lexicographic). Serialized as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(Vec<String>);

impl Signature {
    /// Build a signature from already-ranked words, dropping duplicates.
    pub fn from_ranked<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for w in words {
            let w = w.into();
            if seen.insert(w.clone()) {
                out.push(w);
            }
        }
        Self(out)
    }

    pub fn words(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.0.iter().any(|w| w == word)
    }
}

/// Extract the top `max_words` significant words from normalized text.
///
/// Expects input produced by [`normalize`]; raw text still works but
/// punctuation will stick to tokens.
pub fn extract_signature(normalized: &str, max_words: usize) -> Signature {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in normalized.split_whitespace() {
        if token.chars().count() <= MIN_TOKEN_CHARS || STOP_WORDS.contains(token) {
            continue;
        }
        *counts.entry(token).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(wa, ca), (wb, cb)| cb.cmp(ca).then_with(|| wa.cmp(wb)));
    ranked.truncate(max_words);

    Signature(ranked.into_iter().map(|(w, _)| w.to_string()).collect())
}

/// Normalize then extract in one step.
pub fn signature_of(text: &str, max_words: usize) -> Signature {
    extract_signature(&normalize(text), max_words)
}
