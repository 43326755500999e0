//! Request Pool
//!
//! Bounded-concurrency admission queue for HTTP deliveries:
//! - at most `max_concurrent` requests on the wire at once
//! - excess requests wait in FIFO order (tokio's semaphore is fair)
//! - slots are returned automatically when the [`PoolSlot`] guard drops
//!
//! This is an admission queue, not a lock: nothing is serialized beyond the
//! concurrency bound.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Statistics for the request pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pool capacity
    pub capacity: usize,
    /// Requests currently holding a slot
    pub active: usize,
    /// Requests queued for a slot
    pub waiting: usize,
    /// Slots handed out over the pool lifetime
    pub admitted: u64,
    /// Requests that gave up waiting
    pub timed_out: u64,
    /// Summed queue wait (ms)
    pub total_wait_time_ms: u64,
}

impl PoolStats {
    /// Mean queue wait per admitted request
    #[must_use]
    pub fn average_wait(&self) -> Duration {
        if self.admitted == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.total_wait_time_ms / self.admitted)
        }
    }
}

#[derive(Default)]
struct PoolStatsAtomic {
    active: AtomicUsize,
    waiting: AtomicUsize,
    admitted: AtomicU64,
    timed_out: AtomicU64,
    total_wait_time_ms: AtomicU64,
}

/// Pool errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// No slot freed up in time
    Timeout(Duration),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(waited) => write!(f, "Timed out after {waited:?} waiting for a pool slot"),
        }
    }
}

impl std::error::Error for PoolError {}

/// FIFO admission queue with a fixed number of slots
pub struct RequestPool {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStatsAtomic>,
}

impl std::fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("capacity", &self.capacity)
            .field("available", &self.semaphore.available_permits())
            .finish()
    }
}

impl RequestPool {
    /// Pool with `capacity` slots (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            stats: Arc::new(PoolStatsAtomic::default()),
        }
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a slot, in arrival order
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Timeout`] if no slot frees up within `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<PoolSlot, PoolError> {
        self.stats.waiting.fetch_add(1, Ordering::Relaxed);
        let wait_start = Instant::now();

        let acquired = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await;
        self.stats.waiting.fetch_sub(1, Ordering::Relaxed);

        // The semaphore is never closed, so the inner error cannot occur
        let Ok(Ok(permit)) = acquired else {
            self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::Timeout(timeout));
        };

        let waited = u64::try_from(wait_start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.stats.total_wait_time_ms.fetch_add(waited, Ordering::Relaxed);
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        self.stats.active.fetch_add(1, Ordering::Relaxed);

        Ok(PoolSlot {
            stats: Arc::clone(&self.stats),
            _permit: permit,
        })
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            active: self.stats.active.load(Ordering::Relaxed),
            waiting: self.stats.waiting.load(Ordering::Relaxed),
            admitted: self.stats.admitted.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            total_wait_time_ms: self.stats.total_wait_time_ms.load(Ordering::Relaxed),
        }
    }
}

/// A held pool slot (RAII guard); the slot frees when dropped
pub struct PoolSlot {
    stats: Arc<PoolStatsAtomic>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}
