//! Exact-key store, response values and semantic index as one unit.
//!
//! [`CacheState`] is the only place entries are added or removed, and every
//! mutation updates the entry map, the response map and the inverted index
//! together. The owner wraps it in a single lock, so no observer can see a
//! key in one structure but not the others.

use std::collections::{BTreeSet, HashMap};

use super::entry::CacheEntry;
use super::index::SemanticIndex;
use super::normalize::Signature;

#[derive(Debug, Default)]
pub struct CacheState {
    entries: HashMap<String, CacheEntry>,
    responses: HashMap<String, String>,
    index: SemanticIndex,
}

impl CacheState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry and its response.
    ///
    /// A replaced entry is unindexed under its old signature first and
    /// returned.
    pub fn insert(&mut self, entry: CacheEntry, response: String) -> Option<CacheEntry> {
        let previous = self.remove(&entry.key);
        self.index.index(&entry.key, &entry.signature);
        self.responses.insert(entry.key.clone(), response);
        self.entries.insert(entry.key.clone(), entry);
        previous
    }

    /// Remove an entry, its response and its index postings.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.responses.remove(key);
        self.index.unindex(key, &entry.signature);
        Some(entry)
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn response(&self, key: &str) -> Option<&str> {
        self.responses.get(key).map(String::as_str)
    }

    /// Record a hit. Only bookkeeping fields change, so the index is untouched.
    pub fn touch(&mut self, key: &str, now: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Keys sharing at least one word with `signature`.
    pub fn candidates(&self, signature: &Signature) -> BTreeSet<String> {
        let mut keys = self.index.candidates(signature);
        keys.retain(|k| self.entries.contains_key(k));
        keys
    }

    pub fn count_for(&self, strategy_id: &str) -> usize {
        self.entries
            .values()
            .filter(|e| e.strategy_id == strategy_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct words in the semantic index.
    pub fn indexed_words(&self) -> usize {
        self.index.word_count()
    }

    /// Drop everything, returning the removed entries.
    pub fn clear(&mut self) -> Vec<CacheEntry> {
        self.responses.clear();
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// Snapshot of every entry with its response, for persistence.
    pub fn export(&self) -> Vec<(CacheEntry, String)> {
        self.entries
            .values()
            .filter_map(|e| {
                self.responses
                    .get(&e.key)
                    .map(|r| (e.clone(), r.clone()))
            })
            .collect()
    }

    /// Check that entries, responses and index agree in both directions.
    ///
    /// Returns a description of the first inconsistency found.
    pub fn check_consistency(&self) -> Result<(), String> {
        for key in self.index.keys() {
            if !self.entries.contains_key(key) {
                return Err(format!("index references missing key {key}"));
            }
        }
        for (key, entry) in &self.entries {
            if &entry.key != key {
                return Err(format!("entry stored under {key} claims key {}", entry.key));
            }
            if !self.responses.contains_key(key) {
                return Err(format!("entry {key} has no response"));
            }
            let indexed = self.index.words_for(key);
            let expected: BTreeSet<&str> = entry.signature.iter().collect();
            if indexed != expected {
                return Err(format!(
                    "entry {key} indexed under {indexed:?}, signature is {expected:?}"
                ));
            }
        }
        if let Some(orphan) = self.responses.keys().find(|k| !self.entries.contains_key(*k)) {
            return Err(format!("response without entry for {orphan}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{cache_key, response_digest};
    use crate::cache::normalize::signature_of;

    fn entry(prompt: &str, strategy: &str) -> CacheEntry {
        CacheEntry {
            key: cache_key(prompt, ""),
            signature: signature_of(prompt, 20),
            context_signature: Signature::default(),
            preview_prompt: prompt.into(),
            preview_response: String::new(),
            response_digest: response_digest("r"),
            created_at: 0,
            last_accessed_at: 0,
            hit_count: 0,
            tags: BTreeSet::new(),
            strategy_id: strategy.into(),
            tokens_saved: 0,
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let mut state = CacheState::new();
        let e = entry("list files", "s");
        let key = e.key.clone();
        assert!(state.insert(e, "r".into()).is_none());
        assert_eq!(state.get(&key).unwrap().strategy_id, "s");
        assert_eq!(state.response(&key), Some("r"));
        assert!(state.remove(&key).is_some());
        assert!(state.get(&key).is_none());
        assert!(state.response(&key).is_none());
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_replace_reindexes() {
        let mut state = CacheState::new();
        let mut e = entry("list files", "s");
        let key = e.key.clone();
        state.insert(e.clone(), "r".into());
        e.signature = signature_of("show directories", 20);
        assert!(state.insert(e, "r2".into()).is_some());
        assert!(state.candidates(&signature_of("list", 20)).is_empty());
        assert!(state.candidates(&signature_of("directories", 20)).contains(&key));
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_candidates_only_live_keys() {
        let mut state = CacheState::new();
        state.insert(entry("list files", "s"), "r".into());
        state.insert(entry("list processes", "s"), "r".into());
        assert_eq!(state.candidates(&signature_of("list", 20)).len(), 2);
        state.remove(&cache_key("list files", ""));
        assert_eq!(state.candidates(&signature_of("list", 20)).len(), 1);
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_counts_per_strategy_and_clear() {
        let mut state = CacheState::new();
        state.insert(entry("list files", "a"), "r".into());
        state.insert(entry("show logs", "a"), "r".into());
        state.insert(entry("review code", "b"), "r".into());
        assert_eq!(state.count_for("a"), 2);
        assert_eq!(state.count_for("b"), 1);
        assert_eq!(state.export().len(), 3);
        assert_eq!(state.clear().len(), 3);
        assert!(state.is_empty());
        assert!(state.candidates(&signature_of("list", 20)).is_empty());
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_touch_updates_bookkeeping() {
        let mut state = CacheState::new();
        let e = entry("list files", "s");
        let key = e.key.clone();
        state.insert(e, "r".into());
        assert!(state.touch(&key, 50));
        let got = state.get(&key).unwrap();
        assert_eq!(got.hit_count, 1);
        assert_eq!(got.last_accessed_at, 50);
        assert!(!state.touch("missing", 50));
    }
}
