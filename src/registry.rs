/*!
 * Active job registry.
 *
 * A single counter of jobs currently holding a claim on the shared compute
 * resource. The in-process value behind an async mutex is the concurrency
 * primitive; the counter file is only a durability aid, rewritten
 * atomically on every change while the lock is held so the file never
 * lags behind a newer value. Writes after start-up run on the blocking
 * pool so a slow disk never stalls the async workers.
 */

use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::errors::PersistenceError;
use crate::file_utils::FileManager;

/// Durable, linearizable counter of in-flight jobs
#[derive(Debug)]
pub struct ActiveJobRegistry {
    count: Mutex<u64>,
    path: Option<PathBuf>,
}

impl ActiveJobRegistry {
    /// Open the registry backed by `path`.
    ///
    /// With `reset` the persisted count is discarded and zero is written,
    /// otherwise the last persisted value is resumed (an unreadable file
    /// counts as zero).
    pub fn open<P: AsRef<Path>>(path: P, reset: bool) -> Self {
        let path = path.as_ref().to_path_buf();
        let initial = if reset {
            0
        } else {
            read_count(&path)
        };

        let registry = Self {
            count: Mutex::new(initial),
            path: Some(path),
        };
        if let Err(e) = registry.persist_blocking(initial) {
            warn!("[active_jobs] {}", e);
        }
        info!("[active_jobs] Registry opened with count {}", initial);
        registry
    }

    /// A registry that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            count: Mutex::new(0),
            path: None,
        }
    }

    /// Add one job and return the new count
    pub async fn increment(&self) -> u64 {
        self.increment_and(|_| ()).await.0
    }

    /// Remove one job (never below zero) and return the new count
    pub async fn decrement(&self) -> u64 {
        self.decrement_and(|_| ()).await.0
    }

    /// Add one job and run `f` with the new count while the lock is held.
    ///
    /// Callers that derive other state from the count (resource readiness)
    /// use this so no other change can interleave between the two.
    pub async fn increment_and<F, R>(&self, f: F) -> (u64, R)
    where
        F: FnOnce(u64) -> R,
    {
        let mut count = self.count.lock().await;
        *count += 1;
        let value = *count;
        self.persist_or_warn(value).await;
        info!("[active_jobs] Incremented: {}", value);
        (value, f(value))
    }

    /// Remove one job (never below zero) and run `f` with the new count
    /// while the lock is held
    pub async fn decrement_and<F, R>(&self, f: F) -> (u64, R)
    where
        F: FnOnce(u64) -> R,
    {
        let mut count = self.count.lock().await;
        *count = count.saturating_sub(1);
        let value = *count;
        self.persist_or_warn(value).await;
        info!("[active_jobs] Decremented: {}", value);
        (value, f(value))
    }

    /// Snapshot of the current count, for diagnostics only
    pub async fn current(&self) -> u64 {
        *self.count.lock().await
    }

    async fn persist_or_warn(&self, value: u64) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(source) = FileManager::write_atomic_async(path.clone(), value.to_string()).await {
            warn!(
                "[active_jobs] {}",
                PersistenceError {
                    path: path.display().to_string(),
                    source,
                }
            );
        }
    }

    fn persist_blocking(&self, value: u64) -> Result<(), PersistenceError> {
        match &self.path {
            Some(path) => FileManager::write_atomic(path, &value.to_string()).map_err(|source| {
                PersistenceError {
                    path: path.display().to_string(),
                    source,
                }
            }),
            None => Ok(()),
        }
    }
}

fn read_count(path: &Path) -> u64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}
