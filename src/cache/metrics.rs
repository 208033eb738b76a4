//! Lock-free cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

use super::events::HitKind;

/// Cumulative counters since the cache was constructed.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub exact_hits: AtomicU64,
    pub approximate_hits: AtomicU64,
    pub misses: AtomicU64,
    pub stores: AtomicU64,
    /// Writes refused because no strategy admitted the content.
    pub rejected: AtomicU64,
    pub evictions: AtomicU64,
    /// Estimated tokens not spent thanks to hits.
    pub tokens_saved: AtomicU64,
}

/// Plain-value copy of [`CacheMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub exact_hits: u64,
    pub approximate_hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub rejected: u64,
    pub evictions: u64,
    pub tokens_saved: u64,
}

impl MetricsSnapshot {
    /// Hits over lookups, or 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.exact_hits + self.approximate_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, kind: HitKind, tokens_saved: u32) {
        match kind {
            HitKind::Exact => self.exact_hits.fetch_add(1, Ordering::Relaxed),
            HitKind::Approximate => self.approximate_hits.fetch_add(1, Ordering::Relaxed),
        };
        self.tokens_saved
            .fetch_add(u64::from(tokens_saved), Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            approximate_hits: self.approximate_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            tokens_saved: self.tokens_saved.load(Ordering::Relaxed),
        }
    }

    /// Emit current counters as a structured log line.
    pub fn emit_summary(&self, reason: &str) {
        let s = self.snapshot();
        info!(
            event = "cache_summary",
            reason = reason,
            exact_hits = s.exact_hits,
            approximate_hits = s.approximate_hits,
            misses = s.misses,
            stores = s.stores,
            rejected = s.rejected,
            evictions = s.evictions,
            tokens_saved = s.tokens_saved,
            hit_rate = %format!("{:.2}", s.hit_rate()),
            "Cache metrics"
        );
    }
}
