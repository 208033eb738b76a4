//! Snapshot persistence for the response cache.
//!
//! The cache is saved as one JSON document:
//!
//! ```json
//! { "version": 1, "timestamp": "2026-01-01T00:00:00Z", "entries": [ ... ] }
//! ```
//!
//! Each entry is a [`CacheEntry`] with its `response` inlined. Loading is
//! forgiving: a missing or corrupt document yields an empty cache, and
//! individual entries that fail to parse are skipped. Digest and expiry
//! checks happen in [`ResponseCache::restore`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use super::response_cache::ResponseCache;
use crate::error::{Result, TokenwiseError};

/// Current snapshot document version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    /// Kept as raw values so one bad entry does not poison the rest.
    pub entries: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(flatten)]
    entry: CacheEntry,
    response: String,
}

/// Where snapshot bytes live.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Read the stored snapshot, or `None` if nothing has been saved yet.
    async fn read(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored snapshot.
    async fn write(&self, data: Vec<u8>) -> Result<()>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Snapshot stored in a JSON file, replaced atomically via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    async fn read(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, data: Vec<u8>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Snapshot held in memory. Useful for tests and for sessions that should
/// not touch disk.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<Option<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(Some(data)),
        }
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.contents())
    }

    async fn write(&self, data: Vec<u8>) -> Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Serialize entries into a snapshot document.
pub fn encode_snapshot(entries: Vec<(CacheEntry, String)>, timestamp: DateTime<Utc>) -> Result<Vec<u8>> {
    let entries = entries
        .into_iter()
        .map(|(entry, response)| serde_json::to_value(PersistedEntry { entry, response }))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let snapshot = CacheSnapshot {
        version: SNAPSHOT_VERSION,
        timestamp,
        entries,
    };
    Ok(serde_json::to_vec_pretty(&snapshot)?)
}

/// Parse a snapshot document.
///
/// Returns the entries that parsed and the number that did not.
pub fn decode_snapshot(data: &[u8]) -> Result<(Vec<(CacheEntry, String)>, usize)> {
    let snapshot: CacheSnapshot = serde_json::from_slice(data)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(TokenwiseError::Persistence(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    let mut parsed = Vec::with_capacity(snapshot.entries.len());
    let mut malformed = 0;
    for value in snapshot.entries {
        match serde_json::from_value::<PersistedEntry>(value) {
            Ok(p) => parsed.push((p.entry, p.response)),
            Err(e) => {
                debug!("Skipping malformed snapshot entry: {}", e);
                malformed += 1;
            }
        }
    }
    Ok((parsed, malformed))
}

/// Loads and saves a [`ResponseCache`] through a [`SnapshotBackend`].
///
/// ```rust
/// use tokenwise::cache::{CachePersistence, ResponseCache, StoreOptions, StrategyRegistry};
/// use tokenwise::config::CacheConfig;
///
/// let cache = ResponseCache::new(CacheConfig::default(), StrategyRegistry::with_defaults());
/// cache.store("list files", "ls -la", StoreOptions::default());
///
/// let persistence = CachePersistence::memory();
/// let written = tokio_test::block_on(persistence.save(&cache)).unwrap();
/// assert_eq!(written, 1);
/// ```
#[derive(Clone)]
pub struct CachePersistence {
    backend: Arc<dyn SnapshotBackend>,
}

impl CachePersistence {
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        Self { backend }
    }

    /// Persistence backed by a JSON file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(path)))
    }

    /// Persistence that never leaves the process.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Populate `cache` from the stored snapshot.
    ///
    /// Never fails: unreadable or corrupt snapshots are logged and the cache
    /// stays as it was. Returns the number of entries restored.
    pub async fn load(&self, cache: &ResponseCache) -> usize {
        let data = match self.backend.read().await {
            Ok(Some(data)) => data,
            Ok(None) => return 0,
            Err(e) => {
                warn!(
                    "Failed to read cache snapshot from {}, starting empty: {}",
                    self.backend.describe(),
                    e
                );
                return 0;
            }
        };
        let (entries, malformed) = match decode_snapshot(&data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Cache snapshot is corrupt, starting empty: {}", e);
                return 0;
            }
        };
        if malformed > 0 {
            warn!(malformed, "Skipped malformed cache snapshot entries");
        }
        let restored = cache.restore(entries);
        info!(
            restored,
            source = %self.backend.describe(),
            "Loaded response cache snapshot"
        );
        restored
    }

    /// Write the current contents of `cache`.
    ///
    /// The entry list is copied under the cache's read lock and written with
    /// no lock held. Returns the number of entries written.
    pub async fn save(&self, cache: &ResponseCache) -> Result<usize> {
        let entries = cache.export();
        let count = entries.len();
        let data = encode_snapshot(entries, Utc::now())?;
        self.backend.write(data).await?;
        debug!(count, destination = %self.backend.describe(), "Saved response cache snapshot");
        Ok(count)
    }

    /// [`Self::save`], logging instead of returning failures.
    pub async fn save_best_effort(&self, cache: &ResponseCache) {
        if let Err(e) = self.save(cache).await {
            warn!(
                "Failed to save response cache to {}: {}",
                self.backend.describe(),
                e
            );
        }
    }
}

impl std::fmt::Debug for CachePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePersistence")
            .field("backend", &self.backend.describe())
            .finish()
    }
}
