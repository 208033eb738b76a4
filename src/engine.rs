//! Session lifecycle for the cache and budget engine.
//!
//! An [`Engine`] owns one response cache, one token budget allocator and the
//! snapshot persistence for the cache. It is created explicitly with
//! [`Engine::start`] and torn down with [`Engine::shutdown`], which stops
//! background tasks and flushes the cache one last time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::budget::TokenBudgetAllocator;
use crate::cache::persist::CachePersistence;
use crate::cache::ResponseCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ConfigWatcher};
use crate::error::Result;

/// A running cache and budget session.
pub struct Engine {
    cache: Arc<ResponseCache>,
    budget: Arc<TokenBudgetAllocator>,
    persistence: CachePersistence,
    flush_interval: Duration,
    sweep_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build the engine from `config` and load the cache snapshot from disk.
    pub async fn start(config: Config) -> Result<Self> {
        let persistence = CachePersistence::file(config.snapshot_path());
        Self::start_with(config, persistence, Arc::new(SystemClock::new())).await
    }

    /// Build the engine with explicit persistence and clock.
    pub async fn start_with(
        config: Config,
        persistence: CachePersistence,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let registry = config.registry()?;
        let cache = Arc::new(ResponseCache::with_clock(
            config.cache.clone(),
            registry,
            Arc::clone(&clock),
        ));
        let budget = Arc::new(TokenBudgetAllocator::with_clock(config.budget.clone(), clock));

        if config.cache.enabled {
            persistence.load(&cache).await;
        }
        info!(
            entries = cache.len(),
            strategies = cache.registry().len(),
            pool = config.budget.pool,
            snapshot = %persistence.describe(),
            "Engine started"
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            cache,
            budget,
            persistence,
            flush_interval: Duration::from_secs(config.cache.flush_interval_secs.max(1)),
            sweep_interval: Duration::from_secs(config.cache.sweep_interval_secs.max(1)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn budget(&self) -> &Arc<TokenBudgetAllocator> {
        &self.budget
    }

    pub fn persistence(&self) -> &CachePersistence {
        &self.persistence
    }

    /// Spawn the periodic sweep and flush task.
    ///
    /// Sweeps evict expired and over-capacity entries, reclaim timed-out
    /// budgets and re-size the base token allowance. Flushes write the cache snapshot; failures are logged and
    /// the next tick tries again.
    pub fn spawn_maintenance(&self) {
        let cache = Arc::clone(&self.cache);
        let budget = Arc::clone(&self.budget);
        let persistence = self.persistence.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut flush = tokio::time::interval(self.flush_interval);
        let mut sweep = tokio::time::interval(self.sweep_interval);

        let handle = tokio::spawn(async move {
            flush.tick().await;
            sweep.tick().await;
            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        let evicted = cache.sweep();
                        let reaped = budget.reap_stale();
                        let base = budget.optimize_allocation();
                        if evicted > 0 || reaped > 0 {
                            debug!(evicted, reaped, base, "Maintenance sweep");
                        }
                    }
                    _ = flush.tick() => {
                        persistence.save_best_effort(&cache).await;
                        cache.metrics().emit_summary("periodic");
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        self.track(handle);
    }

    /// Apply strategy changes from `watcher` to the running cache.
    pub fn spawn_config_reload(&self, watcher: ConfigWatcher) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Config>();
        let watch_handle = tokio::spawn(watcher.run(tx, self.shutdown_tx.subscribe()));

        let cache = Arc::clone(&self.cache);
        let apply_handle = tokio::spawn(async move {
            while let Some(config) = rx.recv().await {
                match config.registry() {
                    Ok(registry) => {
                        let evicted = cache.apply_registry(registry);
                        info!(evicted, "Reloaded cache strategies");
                    }
                    Err(e) => warn!(error = %e, "Reloaded strategies are invalid, ignoring"),
                }
            }
        });
        self.track(watch_handle);
        self.track(apply_handle);
    }

    /// Write the cache snapshot now.
    pub async fn flush(&self) -> Result<usize> {
        self.persistence.save(&self.cache).await
    }

    /// Stop background tasks and flush the cache.
    pub async fn shutdown(self) -> Result<usize> {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.cache.metrics().emit_summary("shutdown");
        let written = if self.cache.config().enabled {
            self.flush().await?
        } else {
            0
        };
        info!(written, "Engine stopped");
        Ok(written)
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.cache)
            .field("persistence", &self.persistence)
            .finish()
    }
}
