//! Pending Request Ledger
//!
//! Tracks in-flight messages awaiting a response, keyed by message id.
//!
//! - `register` creates the entry and hands back the receiving half
//! - `resolve` / `reject` complete it exactly once and remove it
//! - `wait` enforces the deadline; expiry removes the entry
//! - `register_guarded` ties the entry to a [`PendingGuard`], so a send
//!   future dropped mid-flight does not leave its id registered
//! - `reject_all` drains the ledger (disconnect, connection loss)
//!
//! A response for an id that is no longer registered (late, duplicate, or
//! unsolicited) is reported back to the caller as unmatched and otherwise
//! ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::traits::TransportError;
use super::types::Response;

/// Receiving half of a pending request
pub type PendingReceiver = oneshot::Receiver<Result<Response, TransportError>>;

struct PendingEntry {
    tx: oneshot::Sender<Result<Response, TransportError>>,
    created_at: Instant,
    ticket: u64,
}

/// Ledger of requests awaiting a response
#[derive(Default)]
pub struct PendingRequests {
    entries: DashMap<String, PendingEntry>,
    next_ticket: AtomicU64,
}

/// Removes its registration from the ledger when dropped
///
/// Only the registration that created the guard is removed; a later request
/// reusing the id is left alone.
#[must_use = "the registration is removed when the guard drops"]
pub struct PendingGuard<'a> {
    ledger: &'a PendingRequests,
    id: String,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let ticket = self.ticket;
        if self
            .ledger
            .entries
            .remove_if(&self.id, |_, entry| entry.ticket == ticket)
            .is_some()
        {
            tracing::debug!(message_id = %self.id, "Pending request abandoned");
        }
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl PendingRequests {
    /// Empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::DuplicateRequest`] if `id` is already pending.
    pub fn register(&self, id: &str) -> Result<PendingReceiver, TransportError> {
        self.insert(id).map(|(rx, _)| rx)
    }

    /// Register a request for the lifetime of the returned guard
    ///
    /// Hold the guard across the whole send; dropping it early (the caller
    /// cancelled) removes the entry.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::DuplicateRequest`] if `id` is already pending.
    pub fn register_guarded(
        &self,
        id: &str,
    ) -> Result<(PendingReceiver, PendingGuard<'_>), TransportError> {
        let (rx, ticket) = self.insert(id)?;
        Ok((
            rx,
            PendingGuard {
                ledger: self,
                id: id.to_string(),
                ticket,
            },
        ))
    }

    fn insert(&self, id: &str) -> Result<(PendingReceiver, u64), TransportError> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(_) => Err(TransportError::DuplicateRequest(id.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                slot.insert(PendingEntry {
                    tx,
                    created_at: Instant::now(),
                    ticket,
                });
                Ok((rx, ticket))
            }
        }
    }

    /// Complete a request with a response; `false` if `id` was not pending
    pub fn resolve(&self, id: &str, response: Response) -> bool {
        self.complete(id, Ok(response))
    }

    /// Complete a request with an error; `false` if `id` was not pending
    pub fn reject(&self, id: &str, error: TransportError) -> bool {
        self.complete(id, Err(error))
    }

    fn complete(&self, id: &str, outcome: Result<Response, TransportError>) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => {
                // Waiter may have given up already; the entry is gone either way
                let _ = entry.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop a request without completing it
    pub fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Reject every pending request; returns how many were rejected
    pub fn reject_all(&self, error: &TransportError) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.reject(id, error.clone()))
            .count()
    }

    /// Wait for a registered request, removing it if the deadline passes
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] on expiry, or whatever error the
    /// request was rejected with.
    pub async fn wait(
        &self,
        id: &str,
        rx: PendingReceiver,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        self.wait_until(id, rx, Instant::now() + timeout, timeout).await
    }

    /// [`Self::wait`] against an absolute deadline
    ///
    /// `timeout` is the configured request timeout reported in the error.
    ///
    /// # Errors
    ///
    /// See [`Self::wait`].
    pub async fn wait_until(
        &self,
        id: &str,
        rx: PendingReceiver,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without completing: ledger was torn down
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                self.remove(id);
                tracing::debug!(
                    message_id = %id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Pending request timed out"
                );
                Err(TransportError::Timeout {
                    id: id.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Whether `id` is pending
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of pending requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Age of the oldest pending request
    #[must_use]
    pub fn oldest_age(&self) -> Option<Duration> {
        self.entries.iter().map(|e| e.created_at.elapsed()).max()
    }
}
