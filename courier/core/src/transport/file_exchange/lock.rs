//! Per-path Lock Manager
//!
//! Serializes writers to the same file path with a bounded wait. Each path
//! gets its own async mutex, created on first use and dropped once nobody
//! holds or waits for it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::transport::traits::TransportError;

type LockTable = DashMap<PathBuf, Arc<Mutex<()>>>;

/// Lock manager statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    /// Locks granted
    pub acquired: u64,
    /// Waits that hit the lock timeout
    pub timed_out: u64,
    /// Paths currently locked or contended
    pub active_paths: usize,
}

/// Acquire/release locks keyed by path
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Arc<LockTable>,
    acquired: AtomicU64,
    timed_out: AtomicU64,
}

impl LockManager {
    /// Empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `path`, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::LockTimeout`] if the lock is still held when
    /// the timeout passes.
    pub async fn acquire(&self, path: &Path, timeout: Duration) -> Result<FileLock, TransportError> {
        let mutex = Arc::clone(
            self.locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                self.acquired.fetch_add(1, Ordering::Relaxed);
                Ok(FileLock {
                    path: path.to_path_buf(),
                    guard: Some(guard),
                    locks: Arc::clone(&self.locks),
                })
            }
            Err(_) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                prune(&self.locks, path);
                tracing::warn!(path = %path.display(), waited_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "Lock timeout");
                Err(TransportError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: timeout,
                })
            }
        }
    }

    /// Whether `path` is currently locked
    #[must_use]
    pub fn is_locked(&self, path: &Path) -> bool {
        self.locks
            .get(path)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            active_paths: self.locks.len(),
        }
    }
}

/// Drop the table entry when only the table still references it
fn prune(locks: &LockTable, path: &Path) {
    locks.remove_if(path, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// A held lock; released on drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
}

impl FileLock {
    /// Locked path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.locks, &self.path);
    }
}
