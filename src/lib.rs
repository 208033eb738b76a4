//! Tokenwise: response cache and token-budget engine for AI coding
//! assistants.
//!
//! The cache avoids repeat LLM calls by matching requests against earlier
//! prompts, exactly or by signature similarity, under per-strategy freshness
//! and capacity bounds. The budget allocator rations a session's token pool
//! across concurrent tasks.
//!
//! # Example
//!
//! ```rust
//! use tokenwise::cache::{ResponseCache, StoreOptions, StrategyRegistry};
//! use tokenwise::config::CacheConfig;
//!
//! let cache = ResponseCache::new(CacheConfig::default(), StrategyRegistry::with_defaults());
//! cache.store("run the tests", "cargo test", StoreOptions::default());
//! assert!(cache.lookup("Run the tests!", "", &[]).is_some());
//! ```

pub mod budget;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;

pub use budget::{BudgetConfig, Priority, TokenBudgetAllocator};
pub use cache::{CacheHit, ResponseCache, StoreOptions, StoreOutcome};
pub use config::Config;
pub use engine::Engine;
pub use error::{Result, TokenwiseError};
