//! Inverted signature index and similarity scoring.
//!
//! The index maps each signature word to the set of entry keys carrying it,
//! so approximate lookup only scores entries that share at least one word
//! with the query instead of scanning the whole store.
//!
//! The index is never used on its own: it lives inside
//! [`super::store::CacheState`] and is only mutated together with the entry
//! map, under the same lock.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::normalize::Signature;

/// Word → keys inverted index.
#[derive(Debug, Default)]
pub struct SemanticIndex {
    words: HashMap<String, HashSet<String>>,
}

impl SemanticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under every word of `signature`.
    pub fn index(&mut self, key: &str, signature: &Signature) {
        for word in signature.iter() {
            self.words
                .entry(word.to_string())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Exact inverse of [`index`](Self::index). Empty buckets are pruned.
    pub fn unindex(&mut self, key: &str, signature: &Signature) {
        for word in signature.iter() {
            if let Some(bucket) = self.words.get_mut(word) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.words.remove(word);
                }
            }
        }
    }

    /// Union of the buckets for every query word.
    ///
    /// An empty signature yields no candidates rather than every entry.
    pub fn candidates(&self, query: &Signature) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for word in query.iter() {
            if let Some(bucket) = self.words.get(word) {
                out.extend(bucket.iter().cloned());
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Number of distinct indexed words.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Every key referenced by any bucket.
    pub fn keys(&self) -> HashSet<&str> {
        self.words
            .values()
            .flat_map(|bucket| bucket.iter().map(String::as_str))
            .collect()
    }

    /// Words under which `key` is indexed.
    pub fn words_for(&self, key: &str) -> BTreeSet<&str> {
        self.words
            .iter()
            .filter(|(_, bucket)| bucket.contains(key))
            .map(|(word, _)| word.as_str())
            .collect()
    }
}

/// Jaccard similarity `|a ∩ b| / |a ∪ b|`, in `[0, 1]`.
///
/// Two empty signatures score 0: nothing in common is not a match.
pub fn jaccard(a: &Signature, b: &Signature) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: HashSet<&str> = a.iter().collect();
    let sb: HashSet<&str> = b.iter().collect();
    let inter = sa.intersection(&sb).count();
    let union = sa.len() + sb.len() - inter;
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Overlap of two tag sets relative to the smaller one.
///
/// Returns `None` when either side has no tags, meaning the tag gate does
/// not apply.
pub fn tag_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let inter = a.intersection(b).count();
    Some(inter as f64 / a.len().min(b.len()) as f64)
}

/// Weights and floors for approximate matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Weight of the prompt signature term.
    pub content_weight: f64,
    /// Weight of the context signature term.
    pub context_weight: f64,
    /// Minimum tag overlap when both query and entry carry tags.
    pub tag_overlap_floor: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            content_weight: 0.7,
            context_weight: 0.3,
            tag_overlap_floor: 0.3,
        }
    }
}

impl SimilarityConfig {
    /// Score a query against an entry's prompt and context signatures.
    ///
    /// The context term only applies when both sides have a context
    /// signature; otherwise the prompt similarity is the score.
    pub fn score(
        &self,
        query: &Signature,
        query_context: &Signature,
        entry: &Signature,
        entry_context: &Signature,
    ) -> f64 {
        let content = jaccard(query, entry);
        if query_context.is_empty() || entry_context.is_empty() {
            return content;
        }
        let total = self.content_weight + self.context_weight;
        if total <= 0.0 {
            return content;
        }
        let context = jaccard(query_context, entry_context);
        ((self.content_weight * content + self.context_weight * context) / total).clamp(0.0, 1.0)
    }

    /// `true` when the tag gate passes (or does not apply).
    pub fn tags_compatible(&self, query: &BTreeSet<String>, entry: &BTreeSet<String>) -> bool {
        match tag_overlap(query, entry) {
            Some(ratio) => ratio >= self.tag_overlap_floor,
            None => true,
        }
    }
}
