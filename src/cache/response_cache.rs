//! LLM response cache with exact and approximate matching.
//!
//! Cache key is a SHA-256 digest of the normalized `(prompt, context)` pair.
//! Lookups try the exact key first; on a miss the request is classified by
//! the [`StrategyRegistry`] and, if some strategy owns it, matched against
//! that strategy's entries by signature similarity.
//!
//! Entries, responses and the semantic index share one `RwLock`. Scoring
//! runs under the read lock; hit bookkeeping and lazy expiry take the write
//! lock briefly afterwards and re-validate what they touch.
//!
//! # Example
//!
//! ```rust
//! use tokenwise::cache::{ResponseCache, StoreOptions};
//! use tokenwise::cache::strategy::StrategyRegistry;
//! use tokenwise::config::CacheConfig;
//!
//! let cache = ResponseCache::new(CacheConfig::default(), StrategyRegistry::with_defaults());
//! cache.store("list files", "ls -la", StoreOptions::default().with_context("fs context"));
//!
//! let hit = cache.lookup("list files", "fs context", &[]).unwrap();
//! assert_eq!(hit.response, "ls -la");
//! assert_eq!(hit.confidence, 1.0);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::entry::{
    cache_key, estimate_tokens, is_valid_key, preview, response_digest, short_key, CacheEntry,
};
use super::events::{CacheEvent, CacheEventBus, HitKind};
use super::eviction::EvictionReason;
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::normalize::{extract_signature, normalize};
use super::store::CacheState;
use super::strategy::{AccessTracker, RequestFacts, Strategy, StrategyRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;

/// A successful lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHit {
    pub response: String,
    /// 1.0 for exact hits, otherwise the similarity score.
    pub confidence: f64,
    pub tokens_saved: u32,
    pub kind: HitKind,
    pub key: String,
    pub strategy_id: String,
}

/// Optional inputs to [`ResponseCache::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub context: String,
    /// Caller's estimate; defaults to a word-count heuristic over the response.
    pub tokens_saved: Option<u32>,
    pub tags: Vec<String>,
}

impl StoreOptions {
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_tokens_saved(mut self, tokens: u32) -> Self {
        self.tokens_saved = Some(tokens);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of a write. Callers are free to ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored { key: String, strategy_id: String },
    /// No strategy admits this content.
    Rejected,
    /// Caching is turned off in config.
    Disabled,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub per_strategy: BTreeMap<String, usize>,
    /// Sum of `hit_count` over live entries.
    pub total_hits: u64,
    /// Sum of `hit_count * tokens_saved` over live entries.
    pub total_tokens_saved: u64,
    pub indexed_words: usize,
    pub counters: MetricsSnapshot,
}

/// Work discovered under the read lock, applied under the write lock.
#[derive(Default)]
struct LookupOutcome {
    hit: Option<CacheHit>,
    expired: Vec<String>,
    invalid: Vec<String>,
}

/// Response cache with TTL expiry, strategy admission and similarity lookup.
pub struct ResponseCache {
    state: RwLock<CacheState>,
    registry: RwLock<Arc<StrategyRegistry>>,
    access: AccessTracker,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
    events: CacheEventBus,
}

impl ResponseCache {
    /// Create an empty cache on the system clock.
    pub fn new(config: CacheConfig, registry: StrategyRegistry) -> Self {
        Self::with_clock(config, registry, Arc::new(SystemClock::new()))
    }

    /// Create an empty cache on a caller-supplied clock.
    pub fn with_clock(config: CacheConfig, registry: StrategyRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(CacheState::new()),
            registry: RwLock::new(Arc::new(registry)),
            access: AccessTracker::new(config.frequency_window_secs),
            events: CacheEventBus::new(config.event_capacity),
            metrics: CacheMetrics::new(),
            config,
            clock,
        }
    }

    /// Deterministic key for a raw prompt and context.
    pub fn cache_key(prompt: &str, context: &str) -> String {
        cache_key(&normalize(prompt), &normalize(context))
    }

    // -- lookup ------------------------------------------------------------

    /// Look up a cached response for `prompt` in `context`.
    ///
    /// `tags` narrow approximate matches: when both the query and a
    /// candidate carry tags, they must overlap by at least the configured
    /// floor. Expired entries are never returned and are removed on sight.
    pub fn lookup(&self, prompt: &str, context: &str, tags: &[&str]) -> Option<CacheHit> {
        if !self.config.enabled {
            return None;
        }
        let now = self.clock.now_millis();
        let norm_prompt = normalize(prompt);
        let norm_context = normalize(context);
        let key = cache_key(&norm_prompt, &norm_context);
        let frequency = self.access.record(&key, now);
        let registry = self.registry();

        let outcome = {
            let state = self.read_state();
            let exact = self.find_exact(&state, &registry, &key, now);
            if exact.hit.is_some() {
                exact
            } else {
                let facts = RequestFacts::new(prompt, context, frequency, hour_of_day(now));
                let mut approx = match registry.classify(&facts) {
                    Some(strategy) => self.find_similar(
                        &state,
                        &registry,
                        strategy,
                        &key,
                        &norm_prompt,
                        &norm_context,
                        tags,
                        now,
                    ),
                    None => LookupOutcome::default(),
                };
                approx.expired.extend(exact.expired);
                approx.invalid.extend(exact.invalid);
                approx
            }
        };

        self.apply_lookup(&registry, &outcome, now);

        match outcome.hit {
            Some(hit) => {
                debug!(
                    key = %short_key(&hit.key),
                    strategy = %hit.strategy_id,
                    confidence = hit.confidence,
                    "Cache hit"
                );
                self.metrics.record_hit(hit.kind, hit.tokens_saved);
                self.events.send(CacheEvent::Hit {
                    key: hit.key.clone(),
                    kind: hit.kind,
                    confidence: hit.confidence,
                    tokens_saved: hit.tokens_saved,
                });
                Some(hit)
            }
            None => {
                self.metrics.record_miss();
                self.events.send(CacheEvent::Miss { key });
                None
            }
        }
    }

    fn find_exact(
        &self,
        state: &CacheState,
        registry: &StrategyRegistry,
        key: &str,
        now: u64,
    ) -> LookupOutcome {
        let mut outcome = LookupOutcome::default();
        let Some(entry) = state.get(key) else {
            return outcome;
        };
        if is_expired(registry, entry, now) {
            outcome.expired.push(entry.key.clone());
            return outcome;
        }
        match validated_response(state, entry) {
            Some(response) => {
                outcome.hit = Some(CacheHit {
                    response,
                    confidence: 1.0,
                    tokens_saved: entry.tokens_saved,
                    kind: HitKind::Exact,
                    key: entry.key.clone(),
                    strategy_id: entry.strategy_id.clone(),
                });
            }
            None => outcome.invalid.push(entry.key.clone()),
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn find_similar(
        &self,
        state: &CacheState,
        registry: &StrategyRegistry,
        strategy: &Strategy,
        key: &str,
        norm_prompt: &str,
        norm_context: &str,
        tags: &[&str],
        now: u64,
    ) -> LookupOutcome {
        let mut outcome = LookupOutcome::default();
        let query = extract_signature(norm_prompt, self.config.signature_size);
        if query.is_empty() {
            return outcome;
        }
        let query_context = extract_signature(norm_context, self.config.signature_size);
        let query_tags = normalize_tags(tags.iter().copied());

        let mut qualified: Vec<(&CacheEntry, f64)> = Vec::new();
        for candidate in state.candidates(&query) {
            if candidate == key {
                continue;
            }
            let Some(entry) = state.get(&candidate) else {
                continue;
            };
            if entry.strategy_id != strategy.id {
                continue;
            }
            if is_expired(registry, entry, now) {
                outcome.expired.push(candidate);
                continue;
            }
            let score = self.config.similarity.score(
                &query,
                &query_context,
                &entry.signature,
                &entry.context_signature,
            );
            if score < strategy.similarity_threshold {
                continue;
            }
            if !self.config.similarity.tags_compatible(&query_tags, &entry.tags) {
                continue;
            }
            qualified.push((entry, score));
        }

        // Highest similarity, then most hits, then most recent access.
        qualified.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| b.hit_count.cmp(&a.hit_count))
                .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
                .then_with(|| a.key.cmp(&b.key))
        });

        for (entry, score) in qualified {
            match validated_response(state, entry) {
                Some(response) => {
                    outcome.hit = Some(CacheHit {
                        response,
                        confidence: score,
                        tokens_saved: entry.tokens_saved,
                        kind: HitKind::Approximate,
                        key: entry.key.clone(),
                        strategy_id: entry.strategy_id.clone(),
                    });
                    break;
                }
                None => outcome.invalid.push(entry.key.clone()),
            }
        }
        outcome
    }

    fn apply_lookup(&self, registry: &StrategyRegistry, outcome: &LookupOutcome, now: u64) {
        if outcome.hit.is_none() && outcome.expired.is_empty() && outcome.invalid.is_empty() {
            return;
        }
        let mut removed = Vec::new();
        {
            let mut state = self.write_state();
            for key in &outcome.expired {
                // Re-check: the entry may have been replaced since the read.
                let still_expired = state
                    .get(key)
                    .is_some_and(|e| is_expired(registry, e, now));
                if still_expired {
                    if let Some(e) = state.remove(key) {
                        removed.push((e, EvictionReason::Expired));
                    }
                }
            }
            for key in &outcome.invalid {
                let still_invalid = state
                    .get(key)
                    .is_some_and(|e| validated_response(&state, e).is_none());
                if still_invalid {
                    if let Some(e) = state.remove(key) {
                        removed.push((e, EvictionReason::Invalid));
                    }
                }
            }
            if let Some(hit) = &outcome.hit {
                state.touch(&hit.key, now);
            }
        }
        self.report_evictions(removed);
    }

    // -- store -------------------------------------------------------------

    /// Cache `response` for `prompt`.
    ///
    /// The write is dropped when no strategy admits the content. Otherwise
    /// the owning strategy's age and size bounds are enforced right after
    /// the insert.
    pub fn store(&self, prompt: &str, response: &str, options: StoreOptions) -> StoreOutcome {
        if !self.config.enabled {
            return StoreOutcome::Disabled;
        }
        let now = self.clock.now_millis();
        let norm_prompt = normalize(prompt);
        let norm_context = normalize(&options.context);
        let key = cache_key(&norm_prompt, &norm_context);
        let registry = self.registry();

        let facts = RequestFacts::new(
            prompt,
            &options.context,
            self.access.count(&key, now),
            hour_of_day(now),
        );
        let Some(strategy) = registry.classify(&facts) else {
            debug!(key = %short_key(&key), kind = %facts.kind(), "No strategy admits content, not caching");
            self.metrics.record_rejected();
            self.events.send(CacheEvent::Rejected { key });
            return StoreOutcome::Rejected;
        };

        let mut tags = normalize_tags(options.tags.iter().map(String::as_str));
        tags.extend(strategy.tags.iter().cloned());

        let entry = CacheEntry {
            key: key.clone(),
            signature: extract_signature(&norm_prompt, self.config.signature_size),
            context_signature: extract_signature(&norm_context, self.config.signature_size),
            preview_prompt: preview(prompt, self.config.preview_chars),
            preview_response: preview(response, self.config.preview_chars),
            response_digest: response_digest(response),
            created_at: now,
            last_accessed_at: now,
            hit_count: 0,
            tags,
            strategy_id: strategy.id.clone(),
            tokens_saved: options
                .tokens_saved
                .unwrap_or_else(|| estimate_tokens(response)),
        };

        let removed = {
            let mut state = self.write_state();
            state.insert(entry, response.to_string());
            self.evict_strategy(&mut state, strategy, now)
        };

        debug!(key = %short_key(&key), strategy = %strategy.id, "Cached response");
        self.metrics.record_store();
        self.events.send(CacheEvent::Stored {
            key: key.clone(),
            strategy: strategy.id.clone(),
        });
        self.report_evictions(removed);

        StoreOutcome::Stored {
            key,
            strategy_id: strategy.id.clone(),
        }
    }

    // -- maintenance -------------------------------------------------------

    /// Enforce age and size bounds for every strategy.
    ///
    /// Also prunes stale access-frequency counters. Returns the number of
    /// entries evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let registry = self.registry();
        let removed = {
            let mut state = self.write_state();
            let mut removed = remove_orphans(&mut state, &registry);
            for strategy in registry.iter() {
                removed.extend(self.evict_strategy(&mut state, strategy, now));
            }
            removed
        };
        self.access.prune(now);
        let n = removed.len();
        self.report_evictions(removed);
        n
    }

    /// Swap in a new strategy set.
    ///
    /// Entries owned by strategies that no longer exist are dropped, then
    /// every strategy's bounds are re-applied.
    pub fn apply_registry(&self, registry: StrategyRegistry) -> usize {
        info!(strategies = registry.len(), "Applying cache strategies");
        *self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(registry);
        self.sweep()
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed: Vec<(CacheEntry, EvictionReason)> = self
            .write_state()
            .clear()
            .into_iter()
            .map(|e| (e, EvictionReason::Cleared))
            .collect();
        self.access.clear();
        let n = removed.len();
        self.report_evictions(removed);
        n
    }

    /// Load persisted entries, rebuilding the index from their signatures.
    ///
    /// Skips entries with a malformed key or an unknown strategy, entries
    /// whose response does not match its digest, and expired ones. Returns the number
    /// of entries restored.
    pub fn restore(&self, entries: Vec<(CacheEntry, String)>) -> usize {
        let now = self.clock.now_millis();
        let registry = self.registry();
        let mut restored = 0;
        let mut skipped = 0;
        {
            let mut state = self.write_state();
            for (mut entry, response) in entries {
                let valid = is_valid_key(&entry.key)
                    && registry.get(&entry.strategy_id).is_some()
                    && response_digest(&response) == entry.response_digest
                    && !is_expired(&registry, &entry, now);
                if !valid {
                    skipped += 1;
                    continue;
                }
                entry.last_accessed_at = entry.last_accessed_at.max(entry.created_at);
                state.insert(entry, response);
                restored += 1;
            }
        }
        if skipped > 0 {
            warn!(skipped, "Skipped stale or invalid cache entries on restore");
        }
        // Re-apply size bounds in case the snapshot came from a larger config.
        self.sweep();
        restored
    }

    // -- introspection -----------------------------------------------------

    /// Return aggregate statistics about the cache.
    pub fn stats(&self) -> CacheStats {
        let state = self.read_state();
        let mut per_strategy = BTreeMap::new();
        let mut total_hits = 0u64;
        let mut total_tokens_saved = 0u64;
        for e in state.values() {
            *per_strategy.entry(e.strategy_id.clone()).or_insert(0) += 1;
            total_hits += e.hit_count;
            total_tokens_saved += e.hit_count * u64::from(e.tokens_saved);
        }
        CacheStats {
            total_entries: state.len(),
            per_strategy,
            total_hits,
            total_tokens_saved,
            indexed_words: state.indexed_words(),
            counters: self.metrics.snapshot(),
        }
    }

    /// Entries with their responses, for persistence.
    pub fn export(&self) -> Vec<(CacheEntry, String)> {
        self.read_state().export()
    }

    /// Entry metadata only (previews, no responses), sorted by key.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.read_state().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Live entry count for one strategy.
    pub fn count_for(&self, strategy_id: &str) -> usize {
        self.read_state().count_for(strategy_id)
    }

    /// Check store/index agreement. Any error here is a bug.
    pub fn verify_consistency(&self) -> Result<(), String> {
        self.read_state().check_consistency()
    }

    pub fn len(&self) -> usize {
        self.read_state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().is_empty()
    }

    pub fn registry(&self) -> Arc<StrategyRegistry> {
        Arc::clone(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Classify a request without touching frequency counters.
    pub fn classify(&self, prompt: &str, context: &str) -> Option<String> {
        let now = self.clock.now_millis();
        let key = Self::cache_key(prompt, context);
        let facts = RequestFacts::new(prompt, context, self.access.count(&key, now), hour_of_day(now));
        self.registry().classify(&facts).map(|s| s.id.clone())
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn events(&self) -> &CacheEventBus {
        &self.events
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // -- private helpers ---------------------------------------------------

    fn evict_strategy(
        &self,
        state: &mut CacheState,
        strategy: &Strategy,
        now: u64,
    ) -> Vec<(CacheEntry, EvictionReason)> {
        let plan = self.config.eviction.plan(
            strategy,
            state.values().filter(|e| e.strategy_id == strategy.id),
            now,
        );
        plan.into_iter()
            .filter_map(|(key, reason)| state.remove(&key).map(|e| (e, reason)))
            .collect()
    }

    fn report_evictions(&self, removed: Vec<(CacheEntry, EvictionReason)>) {
        if removed.is_empty() {
            return;
        }
        self.metrics.record_evictions(removed.len() as u64);
        for (entry, reason) in removed {
            debug!(key = %short_key(&entry.key), strategy = %entry.strategy_id, ?reason, "Evicted cache entry");
            self.access.forget(&entry.key);
            self.events.send(CacheEvent::Evicted {
                key: entry.key,
                strategy: entry.strategy_id,
                reason,
            });
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.len())
            .field("enabled", &self.config.enabled)
            .finish()
    }
}

/// Entries whose strategy is gone from the registry are invisible.
fn is_expired(registry: &StrategyRegistry, entry: &CacheEntry, now: u64) -> bool {
    match registry.get(&entry.strategy_id) {
        Some(strategy) => entry.is_expired(now, strategy.max_age_secs),
        None => true,
    }
}

/// The stored response, if present and matching the entry's digest.
fn validated_response(state: &CacheState, entry: &CacheEntry) -> Option<String> {
    let response = state.response(&entry.key)?;
    if response_digest(response) == entry.response_digest {
        Some(response.to_string())
    } else {
        warn!(key = %short_key(&entry.key), "Cached response failed digest check");
        None
    }
}

fn remove_orphans(
    state: &mut CacheState,
    registry: &StrategyRegistry,
) -> Vec<(CacheEntry, EvictionReason)> {
    let orphans: Vec<String> = state
        .values()
        .filter(|e| registry.get(&e.strategy_id).is_none())
        .map(|e| e.key.clone())
        .collect();
    orphans
        .iter()
        .filter_map(|k| state.remove(k))
        .map(|e| (e, EvictionReason::Orphaned))
        .collect()
}

fn normalize_tags<'a>(tags: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    tags.map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn hour_of_day(now_millis: u64) -> u32 {
    DateTime::<Utc>::from_timestamp_millis(now_millis as i64)
        .map(|dt| dt.hour())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::strategy::{Condition, ConditionField, ConditionOperator};
    use crate::clock::ManualClock;

    const HOUR: u64 = 3600;

    fn commands_strategy(threshold: f64, max_size: usize) -> Strategy {
        Strategy {
            id: "simple_commands".into(),
            display_name: "Short commands".into(),
            enabled: true,
            max_age_secs: 12 * HOUR,
            max_size,
            similarity_threshold: threshold,
            priority: 0,
            conditions: vec![Condition::new(
                ConditionField::RequestType,
                ConditionOperator::Equals,
                "command",
            )],
            tags: BTreeSet::new(),
        }
    }

    fn test_cache(threshold: f64, max_size: usize) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let registry = StrategyRegistry::new(vec![commands_strategy(threshold, max_size)]).unwrap();
        let cache = ResponseCache::with_clock(CacheConfig::default(), registry, clock.clone());
        (cache, clock)
    }

    fn cmd_tags() -> StoreOptions {
        StoreOptions::default()
            .with_context("fs context")
            .with_tags(["cmd"])
    }

    #[test]
    fn test_exact_hit_confidence_one() {
        let (cache, _) = test_cache(0.9, 100);
        let outcome = cache.store("list files", "ls -la", cmd_tags());
        assert!(matches!(outcome, StoreOutcome::Stored { .. }));
        let hit = cache.lookup("list files", "fs context", &[]).unwrap();
        assert_eq!(hit.response, "ls -la");
        assert_eq!(hit.confidence, 1.0);
        assert_eq!(hit.kind, HitKind::Exact);
    }

    #[test]
    fn test_exact_hit_ignores_case_and_punctuation() {
        let (cache, _) = test_cache(0.9, 100);
        cache.store("List files!", "ls -la", cmd_tags());
        let hit = cache.lookup("list   FILES", "FS context.", &[]).unwrap();
        assert_eq!(hit.kind, HitKind::Exact);
    }

    #[test]
    fn test_high_threshold_rejects_near_match() {
        let (cache, _) = test_cache(0.98, 100);
        cache.store("list files", "ls -la", cmd_tags());
        assert!(cache.lookup("list files please", "fs context", &[]).is_none());
        assert!(cache.lookup("list files please", "", &[]).is_none());
    }

    #[test]
    fn test_low_threshold_accepts_near_match() {
        let (cache, _) = test_cache(0.5, 100);
        cache.store("list files", "ls -la", cmd_tags());
        let hit = cache.lookup("list files please", "", &[]).unwrap();
        assert_eq!(hit.response, "ls -la");
        assert_eq!(hit.kind, HitKind::Approximate);
        assert!((hit.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let (cache, clock) = test_cache(0.5, 100);
        cache.store("list files", "ls -la", cmd_tags());
        clock.advance_secs(12 * HOUR + 1);
        assert!(cache.lookup("list files", "fs context", &[]).is_none());
        assert!(cache.is_empty());
        cache.verify_consistency().unwrap();
    }

    #[test]
    fn test_expired_candidate_not_returned_approximately() {
        let (cache, clock) = test_cache(0.5, 100);
        cache.store("list files", "ls -la", cmd_tags());
        clock.advance_secs(12 * HOUR + 1);
        assert!(cache.lookup("list files please", "", &[]).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_visible_at_exact_max_age() {
        let (cache, clock) = test_cache(0.5, 100);
        cache.store("list files", "ls -la", cmd_tags());
        clock.advance_secs(12 * HOUR);
        assert!(cache.lookup("list files", "fs context", &[]).is_some());
    }

    #[test]
    fn test_rejected_when_no_strategy_admits() {
        let (cache, _) = test_cache(0.5, 100);
        let outcome = cache.store("tell me a story", "once upon a time", StoreOptions::default());
        assert_eq!(outcome, StoreOutcome::Rejected);
        assert!(cache.is_empty());
        assert_eq!(cache.metrics().snapshot().rejected, 1);
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let cache = ResponseCache::with_clock(config, StrategyRegistry::with_defaults(), clock);
        assert_eq!(
            cache.store("list files", "ls", StoreOptions::default()),
            StoreOutcome::Disabled
        );
        assert!(cache.lookup("list files", "", &[]).is_none());
    }

    #[test]
    fn test_capacity_bound_per_strategy() {
        let (cache, clock) = test_cache(0.9, 5);
        for i in 0..30 {
            clock.advance_secs(1);
            cache.store(&format!("run job{i}"), "ok", StoreOptions::default());
            assert!(cache.count_for("simple_commands") <= 5);
        }
        cache.verify_consistency().unwrap();
    }

    #[test]
    fn test_tie_break_prefers_more_hits() {
        let (cache, clock) = test_cache(0.3, 100);
        cache.store("list files alpha", "A", StoreOptions::default());
        cache.store("list files beta", "B", StoreOptions::default());
        // Two exact hits on B.
        clock.advance_secs(1);
        cache.lookup("list files beta", "", &[]);
        cache.lookup("list files beta", "", &[]);
        // Query equally similar to both (2/4).
        let hit = cache.lookup("list files gamma", "", &[]).unwrap();
        assert_eq!(hit.response, "B");
    }

    #[test]
    fn test_tag_gate_blocks_unrelated_tags() {
        let (cache, _) = test_cache(0.5, 100);
        cache.store("list files", "ls -la", cmd_tags());
        assert!(cache.lookup("list files please", "", &["docs"]).is_none());
        assert!(cache.lookup("list files please", "", &["cmd"]).is_some());
    }

    #[test]
    fn test_hit_updates_bookkeeping_and_stats() {
        let (cache, clock) = test_cache(0.5, 100);
        cache.store("list files", "ls -la", cmd_tags().with_tokens_saved(40));
        clock.advance_secs(5);
        cache.lookup("list files", "fs context", &[]);
        cache.lookup("list files", "fs context", &[]);
        let entry = &cache.entries()[0];
        assert_eq!(entry.hit_count, 2);
        assert!(entry.last_accessed_at > entry.created_at);
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_hits, 2);
        assert_eq!(stats.total_tokens_saved, 80);
        assert_eq!(stats.counters.exact_hits, 2);
        assert_eq!(stats.counters.tokens_saved, 80);
    }

    #[test]
    fn test_clear_removes_everything() {
        let (cache, _) = test_cache(0.5, 100);
        cache.store("list files", "ls", StoreOptions::default());
        cache.store("show logs", "tail", StoreOptions::default());
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert!(cache.lookup("list files please", "", &[]).is_none());
        cache.verify_consistency().unwrap();
    }

    #[test]
    fn test_restore_skips_invalid_entries() {
        let (source, _) = test_cache(0.5, 100);
        source.store("list files", "ls -la", cmd_tags());
        source.store("show logs", "tail -f", StoreOptions::default());
        let mut exported = source.export();
        // Corrupt one response so its digest no longer matches.
        exported[0].1.push('!');

        let (target, _) = test_cache(0.5, 100);
        assert_eq!(target.restore(exported), 1);
        target.verify_consistency().unwrap();
    }

    #[test]
    fn test_apply_registry_drops_orphans() {
        let (cache, _) = test_cache(0.5, 100);
        cache.store("list files", "ls", StoreOptions::default());
        let mut other = commands_strategy(0.5, 100);
        other.id = "renamed".into();
        let removed = cache.apply_registry(StrategyRegistry::new(vec![other]).unwrap());
        assert_eq!(removed, 1);
        assert!(cache.is_empty());
        cache.verify_consistency().unwrap();
    }

    #[test]
    fn test_sweep_removes_expired() {
        let (cache, clock) = test_cache(0.5, 100);
        cache.store("list files", "ls", StoreOptions::default());
        clock.advance_secs(13 * HOUR);
        cache.store("show logs", "tail", StoreOptions::default());
        // The second store already evicted the expired entry for its strategy.
        assert_eq!(cache.len(), 1);
        clock.advance_secs(13 * HOUR);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (cache, _) = test_cache(0.5, 100);
        let mut rx = cache.events().subscribe();
        cache.store("list files", "ls", StoreOptions::default());
        cache.lookup("list files", "", &[]);
        assert!(matches!(rx.recv().await.unwrap(), CacheEvent::Stored { .. }));
        match rx.recv().await.unwrap() {
            CacheEvent::Hit { kind, confidence, .. } => {
                assert_eq!(kind, HitKind::Exact);
                assert_eq!(confidence, 1.0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_cache_key_matches_normalized_input() {
        assert_eq!(
            ResponseCache::cache_key("List Files!", ""),
            ResponseCache::cache_key("list files", "")
        );
        assert_ne!(
            ResponseCache::cache_key("list files", "a"),
            ResponseCache::cache_key("list files", "b")
        );
    }
}
