//! Age and capacity bounds per strategy.
//!
//! [`EvictionPolicy::plan`] is pure: it looks at a strategy's entries and
//! returns which keys to drop and why. The cache applies the plan through
//! [`super::store::CacheState::remove`], which keeps the index in step.

use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use super::strategy::Strategy;

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Older than its strategy's `max_age_secs`.
    Expired,
    /// Removed to bring the strategy back under `max_size`.
    Capacity,
    /// Explicit clear.
    Cleared,
    /// Response missing or failed digest validation.
    Invalid,
    /// Owning strategy no longer exists.
    Orphaned,
}

/// Composite scoring weights for capacity eviction.
///
/// `score = hits * frequency_weight - idle_minutes * recency_weight
///          - age_minutes * age_weight`; lowest scores go first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    pub frequency_weight: f64,
    pub recency_weight: f64,
    pub age_weight: f64,
    /// Fraction of a strategy's entries removed once it exceeds `max_size`.
    pub evict_fraction: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            frequency_weight: 1.0,
            recency_weight: 1.0,
            age_weight: 0.1,
            evict_fraction: 0.2,
        }
    }
}

impl EvictionPolicy {
    /// Retention score of an entry at `now`. Higher means keep.
    pub fn score(&self, entry: &CacheEntry, now: u64) -> f64 {
        let idle = entry.idle_millis(now) as f64 / MILLIS_PER_MINUTE;
        let age = entry.age_millis(now) as f64 / MILLIS_PER_MINUTE;
        entry.hit_count as f64 * self.frequency_weight - idle * self.recency_weight
            - age * self.age_weight
    }

    /// Decide which of `entries` (all owned by `strategy`) to evict.
    ///
    /// Expired entries always go. If the survivors still exceed
    /// `max_size`, the lowest-scoring ones are dropped: at least enough to
    /// meet the bound, and at least `evict_fraction` of the survivors.
    pub fn plan<'a, I>(&self, strategy: &Strategy, entries: I, now: u64) -> Vec<(String, EvictionReason)>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        let mut out = Vec::new();
        let mut live: Vec<(&CacheEntry, f64)> = Vec::new();
        for entry in entries {
            if entry.is_expired(now, strategy.max_age_secs) {
                out.push((entry.key.clone(), EvictionReason::Expired));
            } else {
                live.push((entry, self.score(entry, now)));
            }
        }

        if live.len() <= strategy.max_size {
            return out;
        }

        let excess = live.len() - strategy.max_size;
        let fraction = (live.len() as f64 * self.evict_fraction.clamp(0.0, 1.0)).ceil() as usize;
        let to_remove = excess.max(fraction).min(live.len());

        // Lowest score first; older access, then key, for a stable order.
        live.sort_by(|(a, sa), (b, sb)| {
            sa.total_cmp(sb)
                .then_with(|| a.last_accessed_at.cmp(&b.last_accessed_at))
                .then_with(|| a.key.cmp(&b.key))
        });
        out.extend(
            live.into_iter()
                .take(to_remove)
                .map(|(e, _)| (e.key.clone(), EvictionReason::Capacity)),
        );
        out
    }
}
