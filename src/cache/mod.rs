//! Response caching with exact and approximate matching.
//!
//! - [`normalize`]: canonical text form and signature extraction
//! - [`request_kind`]: keyword-based request classification
//! - [`entry`], [`store`], [`index`]: entries, the guarded store and the
//!   inverted word index
//! - [`strategy`], [`eviction`]: admission and retention policy
//! - [`response_cache`]: the `lookup` / `store` facade
//! - [`persist`]: JSON snapshots

pub mod entry;
pub mod events;
pub mod eviction;
pub mod index;
pub mod metrics;
pub mod normalize;
pub mod persist;
pub mod request_kind;
pub mod response_cache;
pub mod store;
pub mod strategy;

pub use entry::CacheEntry;
pub use events::{CacheEvent, CacheEventBus, HitKind};
pub use eviction::{EvictionPolicy, EvictionReason};
pub use index::SimilarityConfig;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use persist::{CachePersistence, FileBackend, MemoryBackend, SnapshotBackend};
pub use request_kind::RequestKind;
pub use response_cache::{CacheHit, CacheStats, ResponseCache, StoreOptions, StoreOutcome};
pub use strategy::{Strategy, StrategyRegistry};
