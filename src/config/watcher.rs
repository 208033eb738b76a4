//! Hot reload of the config file by polling.
//!
//! The watcher checks the file's modification time on an interval. When it
//! changes, the file is re-read and compared against the last content seen,
//! so a bare `touch` does not trigger a reload. Only configs that parse and
//! validate are forwarded; a rejected edit keeps the running config.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Polling watcher for `config.json`.
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    last_mtime: Option<SystemTime>,
    last_digest: Option<String>,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            poll_interval,
            last_mtime: None,
            last_digest: None,
        }
    }

    pub fn default_path(poll_interval: Duration) -> Self {
        Self::new(Config::path(), poll_interval)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remember the file's current state without reporting it.
    pub fn prime(&mut self) {
        self.last_mtime = read_mtime(&self.path);
        self.last_digest = read_digest(&self.path);
    }

    /// Check once. Returns a new config if the file's content changed and
    /// the new content is valid.
    pub fn poll(&mut self) -> Option<Config> {
        let mtime = read_mtime(&self.path);
        let touched = match (self.last_mtime, mtime) {
            (Some(prev), Some(next)) => next != prev,
            (None, Some(_)) => true,
            _ => false,
        };
        if !touched {
            return None;
        }
        self.last_mtime = mtime;

        let digest = read_digest(&self.path);
        if digest.is_some() && digest == self.last_digest {
            debug!(path = %self.path.display(), "Config touched without content change");
            return None;
        }
        self.last_digest = digest;

        match Config::load_from_path(&self.path) {
            Ok(config) => {
                info!(
                    path = %self.path.display(),
                    strategies = config.strategies.len(),
                    "Config file changed, reloading"
                );
                Some(config)
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Config reload rejected; keeping running configuration"
                );
                None
            }
        }
    }

    /// Poll until shutdown, forwarding each accepted config to `tx`.
    pub async fn run(mut self, tx: mpsc::UnboundedSender<Config>, mut shutdown_rx: watch::Receiver<bool>) {
        self.prime();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Config watcher shutting down");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(config) = self.poll() {
                        if tx.send(config).is_err() {
                            warn!("Config reload receiver dropped, stopping watcher");
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn read_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

fn read_digest(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| hex::encode(Sha256::digest(&bytes)))
}
