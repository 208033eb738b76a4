//! Configuration for the tokenwise engine.
//!
//! Loaded from `~/.tokenwise/config.json`. Every section defaults, so an
//! empty file (or no file) yields the built-in behavior. A few settings can
//! be overridden from the environment:
//!
//! - `TOKENWISE_CACHE_ENABLED` (`true`/`false`/`1`/`0`)
//! - `TOKENWISE_SNAPSHOT_PATH`
//! - `TOKENWISE_BUDGET_POOL`

pub mod watcher;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::budget::BudgetConfig;
use crate::cache::eviction::EvictionPolicy;
use crate::cache::index::SimilarityConfig;
use crate::cache::strategy::{default_strategies, Strategy, StrategyRegistry};
use crate::error::{Result, TokenwiseError};

pub use watcher::ConfigWatcher;

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Snapshot file; `None` means `~/.tokenwise/cache/responses.json`.
    pub snapshot_path: Option<PathBuf>,
    /// Words kept per prompt signature.
    pub signature_size: usize,
    /// Characters kept in prompt and response previews.
    pub preview_chars: usize,
    /// Window over which repeat requests count toward `access_frequency`.
    pub frequency_window_secs: u64,
    /// Interval between background snapshot flushes.
    pub flush_interval_secs: u64,
    /// Interval between background eviction sweeps.
    pub sweep_interval_secs: u64,
    /// Capacity of the cache event channel.
    pub event_capacity: usize,
    pub similarity: SimilarityConfig,
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            snapshot_path: None,
            signature_size: crate::cache::normalize::DEFAULT_SIGNATURE_SIZE,
            preview_chars: crate::cache::entry::DEFAULT_PREVIEW_CHARS,
            frequency_window_secs: 3600,
            flush_interval_secs: 300,
            sweep_interval_secs: 60,
            event_capacity: 256,
            similarity: SimilarityConfig::default(),
            eviction: EvictionPolicy::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub budget: BudgetConfig,
    /// Admission strategies in declaration order.
    pub strategies: Vec<Strategy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            strategies: default_strategies(),
        }
    }
}

impl Config {
    /// Configuration directory (`~/.tokenwise`).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tokenwise")
    }

    /// Configuration file path (`~/.tokenwise/config.json`).
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default path, falling back to defaults when the file
    /// does not exist. Environment overrides are applied either way.
    pub fn load() -> Result<Self> {
        let path = Self::path();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Load and validate a specific config file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TokenwiseError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            TokenwiseError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache.signature_size == 0 {
            return Err(TokenwiseError::Config(
                "cache.signature_size must be at least 1".into(),
            ));
        }
        let weights = self.cache.similarity.content_weight + self.cache.similarity.context_weight;
        if weights.is_nan() || weights <= 0.0 {
            return Err(TokenwiseError::Config(
                "cache.similarity weights must sum to a positive value".into(),
            ));
        }
        if self.budget.max_per_task == 0 || self.budget.pool == 0 {
            return Err(TokenwiseError::Config(
                "budget.pool and budget.max_per_task must be positive".into(),
            ));
        }
        self.registry().map(|_| ())
    }

    /// Compile the configured strategies.
    pub fn registry(&self) -> Result<StrategyRegistry> {
        StrategyRegistry::new(self.strategies.clone())
    }

    /// Resolved snapshot location.
    pub fn snapshot_path(&self) -> PathBuf {
        self.cache
            .snapshot_path
            .clone()
            .unwrap_or_else(|| Self::dir().join("cache").join("responses.json"))
    }

    /// Apply `TOKENWISE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("TOKENWISE_CACHE_ENABLED") {
            match parse_bool(&value) {
                Some(enabled) => self.cache.enabled = enabled,
                None => warn!(value = %value, "Ignoring invalid TOKENWISE_CACHE_ENABLED"),
            }
        }
        if let Some(path) = lookup("TOKENWISE_SNAPSHOT_PATH") {
            if !path.trim().is_empty() {
                self.cache.snapshot_path = Some(PathBuf::from(path));
            }
        }
        if let Some(value) = lookup("TOKENWISE_BUDGET_POOL") {
            match value.trim().parse::<u64>() {
                Ok(pool) if pool > 0 => self.budget.pool = pool,
                _ => warn!(value = %value, "Ignoring invalid TOKENWISE_BUDGET_POOL"),
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.signature_size, 20);
        assert_eq!(config.strategies.len(), 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.strategies.len(), 3);
        assert_eq!(config.budget.max_per_task, 8000);
    }

    #[test]
    fn test_partial_sections() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"cache": {"similarity": {"content_weight": 0.5}}, "budget": {"max_per_task": 4000}}"#,
        )
        .unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.cache.similarity.content_weight, 0.5);
        assert_eq!(config.cache.similarity.context_weight, 0.3);
        assert_eq!(config.budget.max_per_task, 4000);
        assert_eq!(config.budget.pool, 100_000);
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"strategies": [{
                "id": "broken", "display_name": "Broken", "max_age_secs": 60,
                "max_size": 10, "similarity_threshold": 0.8,
                "conditions": [{"field": "content", "operator": "regex", "value": "(unclosed"}]
            }]}"#,
        )
        .unwrap();
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("broken"), "{err}");
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load_from_path(&path),
            Err(TokenwiseError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.budget.pool = 42_000;
        config.save_to_path(&path).unwrap();
        assert_eq!(Config::load_from_path(&path).unwrap().budget.pool, 42_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides_from(overrides(&[
            ("TOKENWISE_CACHE_ENABLED", "false"),
            ("TOKENWISE_SNAPSHOT_PATH", "/tmp/tw.json"),
            ("TOKENWISE_BUDGET_POOL", "5000"),
        ]));
        assert!(!config.cache.enabled);
        assert_eq!(config.snapshot_path(), PathBuf::from("/tmp/tw.json"));
        assert_eq!(config.budget.pool, 5000);
    }

    #[test]
    fn test_invalid_env_overrides_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(overrides(&[
            ("TOKENWISE_CACHE_ENABLED", "maybe"),
            ("TOKENWISE_BUDGET_POOL", "lots"),
        ]));
        assert!(config.cache.enabled);
        assert_eq!(config.budget.pool, 100_000);
    }

    #[test]
    fn test_default_snapshot_path_under_config_dir() {
        let config = Config::default();
        assert!(config.snapshot_path().starts_with(Config::dir()));
    }
}
