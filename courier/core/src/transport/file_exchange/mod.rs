//! File-Exchange Transport
//!
//! Delivers messages through a shared directory:
//!
//! ```text
//! {exchange_dir}/
//!   requests/{id}.json    written by us, consumed by the peer
//!   responses/{id}.json   written by the peer, polled and removed by us
//!   events/*.json         unsolicited peer messages, polled while connected
//! ```
//!
//! No change notification is assumed; responses and events are found by
//! polling at `poll_interval`, which trades latency for I/O. Writers to the
//! same path are serialized by the [`LockManager`]; a lock not acquired within
//! `lock_timeout` fails the delivery.
//!
//! "Connected" means the directory is readable and writable, as proven by the
//! write/read/compare/delete probe.

mod lock;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub use lock::{FileLock, LockManager, LockStats};
pub use store::LocalFileStore;

use super::base::TransportCore;
use super::channel::FileStore;
use super::circuit_breaker::CircuitBreakerConfig;
use super::events::{EventBus, TransportEvent};
use super::traits::{SendOptions, Transport, TransportError};
use super::types::{
    now_millis, HealthCheckResult, HealthStatus, Message, Response, TransportCapabilities,
    TransportKind,
};
use super::wire::{self, Inbound};

const REQUESTS_DIR: &str = "requests";
const RESPONSES_DIR: &str = "responses";
const EVENTS_DIR: &str = "events";

// ============================================================================
// Configuration
// ============================================================================

/// File-exchange transport settings
#[derive(Clone, Debug, PartialEq)]
pub struct FileExchangeConfig {
    /// Shared exchange directory
    pub exchange_dir: PathBuf,
    /// How often responses and events are polled for
    pub poll_interval: Duration,
    /// Bound on waiting for a per-path write lock
    pub lock_timeout: Duration,
    /// Default per-request deadline
    pub request_timeout: Duration,
    /// Whether to poll `events/` while connected
    pub watch_events: bool,
    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for FileExchangeConfig {
    fn default() -> Self {
        Self {
            exchange_dir: default_exchange_dir(),
            poll_interval: Duration::from_millis(100),
            lock_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            watch_events: true,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// `$XDG_DATA_HOME/courier/exchange`, or the temp dir when there is no data dir
#[must_use]
pub fn default_exchange_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("courier")
        .join("exchange")
}

impl FileExchangeConfig {
    /// Short timings for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            exchange_dir: std::env::temp_dir().join("courier-test-exchange"),
            poll_interval: Duration::from_millis(10),
            lock_timeout: Duration::from_millis(50),
            request_timeout: Duration::from_millis(300),
            watch_events: true,
            circuit_breaker: CircuitBreakerConfig::for_testing(),
        }
    }

    /// Set the exchange directory
    #[must_use]
    pub fn with_exchange_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exchange_dir = dir.into();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.exchange_dir.as_os_str().is_empty() {
            return Err(TransportError::Configuration(
                "file exchange requires an exchange_dir".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(TransportError::Configuration(
                "file exchange poll_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn requests_dir(&self) -> PathBuf {
        self.exchange_dir.join(REQUESTS_DIR)
    }

    fn responses_dir(&self) -> PathBuf {
        self.exchange_dir.join(RESPONSES_DIR)
    }

    fn events_dir(&self) -> PathBuf {
        self.exchange_dir.join(EVENTS_DIR)
    }
}

/// Message ids as file names
///
/// `[A-Za-z0-9-]` is kept; every other byte becomes `_` plus two hex digits,
/// so distinct ids never share a file.
fn file_name_for(id: &str) -> String {
    let mut name = String::with_capacity(id.len() + 5);
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            name.push(char::from(byte));
        } else {
            name.push('_');
            name.push_str(&hex::encode([byte]));
        }
    }
    name.push_str(".json");
    name
}

// ============================================================================
// Transport
// ============================================================================

/// Shared-directory transport
pub struct FileExchangeTransport {
    core: Arc<TransportCore>,
    config: FileExchangeConfig,
    store: Arc<dyn FileStore>,
    locks: LockManager,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FileExchangeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileExchangeTransport")
            .field("exchange_dir", &self.config.exchange_dir)
            .field("core", &self.core)
            .field("locks", &self.locks.stats())
            .finish_non_exhaustive()
    }
}

impl FileExchangeTransport {
    /// Transport over the local filesystem
    #[must_use]
    pub fn new(config: FileExchangeConfig) -> Self {
        Self::with_store(config, Arc::new(LocalFileStore))
    }

    /// Transport over a caller-supplied store
    #[must_use]
    pub fn with_store(config: FileExchangeConfig, store: Arc<dyn FileStore>) -> Self {
        let core = Arc::new(TransportCore::new(
            TransportKind::FileExchange,
            config.request_timeout,
            config.circuit_breaker.clone(),
        ));
        Self {
            core,
            config,
            store,
            locks: LockManager::new(),
            watcher: Mutex::new(None),
        }
    }

    /// Shared transport skeleton
    #[must_use]
    pub fn core(&self) -> &TransportCore {
        &self.core
    }

    /// Lock statistics
    #[must_use]
    pub fn lock_stats(&self) -> LockStats {
        self.locks.stats()
    }

    /// Path a request for `id` is written to
    #[must_use]
    pub fn request_path(&self, id: &str) -> PathBuf {
        self.config.requests_dir().join(file_name_for(id))
    }

    /// Path the response for `id` is expected at
    #[must_use]
    pub fn response_path(&self, id: &str) -> PathBuf {
        self.config.responses_dir().join(file_name_for(id))
    }

    async fn write_locked(&self, path: &Path, contents: &[u8]) -> Result<(), TransportError> {
        let _lock = self.locks.acquire(path, self.config.lock_timeout).await?;
        self.store.write(path, contents).await?;
        Ok(())
    }

    async fn deliver(&self, message: Message, timeout: Duration) -> Result<Response, TransportError> {
        if !self.core.has_channel() {
            return Err(TransportError::NotConnected(TransportKind::FileExchange));
        }
        let id = message.id.clone();
        let body = serde_json::to_vec_pretty(&message)?;
        let request_path = self.request_path(&id);
        let response_path = self.response_path(&id);
        let deadline = Instant::now() + timeout;
        let pending = self.core.pending();
        let (mut rx, _registered) = pending.register_guarded(&id)?;

        // Left over from an abandoned send with the same id
        self.store.remove(&response_path).await?;
        self.write_locked(&request_path, &body).await?;
        tracing::debug!(message_id = %id, path = %request_path.display(), "Request written");

        let result = tokio::select! {
            // Rejected while waiting (disconnect)
            early = &mut rx => early.unwrap_or(Err(TransportError::Disconnected)),
            polled = tokio::time::timeout_at(deadline, self.poll_response(&id, &response_path)) => {
                pending.remove(&id);
                polled.unwrap_or_else(|_| {
                    tracing::debug!(message_id = %id, "No response file before deadline");
                    Err(TransportError::Timeout { id: id.clone(), after: timeout })
                })
            }
        };

        // The request is settled either way; a stale file would be replayed
        if let Err(e) = self.store.remove(&request_path).await {
            tracing::debug!(path = %request_path.display(), error = %e, "Could not remove request file");
        }
        result
    }

    async fn poll_response(&self, id: &str, path: &Path) -> Result<Response, TransportError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(bytes) = self.store.read(path).await? {
                if let Err(e) = self.store.remove(path).await {
                    tracing::debug!(path = %path.display(), error = %e, "Could not remove response file");
                }
                let body: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|e| TransportError::MalformedResponse(format!("response file: {e}")))?;
                return wire::response_from_body(id, Some(body));
            }
        }
    }

    /// Write, read back, compare, delete
    async fn probe(&self) -> Result<(), TransportError> {
        let path = self
            .config
            .exchange_dir
            .join(format!(".probe-{}", hex::encode(rand::random::<[u8; 8]>())));
        let contents = format!("courier probe {}", now_millis()).into_bytes();

        self.write_locked(&path, &contents).await?;
        let read_back = self.store.read(&path).await;
        let removed = self.store.remove(&path).await;

        match read_back? {
            Some(bytes) if bytes == contents => {}
            Some(_) => {
                return Err(TransportError::Io(
                    "probe file content did not match".to_string(),
                ))
            }
            None => return Err(TransportError::Io("probe file vanished".to_string())),
        }
        removed?;
        Ok(())
    }

    async fn prepare_layout(&self) -> Result<(), TransportError> {
        for dir in [
            self.config.requests_dir(),
            self.config.responses_dir(),
            self.config.events_dir(),
        ] {
            self.store.create_dir_all(&dir).await?;
        }
        self.probe().await
    }

    fn start_event_watcher(&self) {
        if !self.config.watch_events {
            return;
        }
        let core = Arc::clone(&self.core);
        let store = Arc::clone(&self.store);
        let dir = self.config.events_dir();
        let interval = self.config.poll_interval;
        let handle = tokio::spawn(watch_events(core, store, dir, interval));
        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
    }
}

async fn watch_events(
    core: Arc<TransportCore>,
    store: Arc<dyn FileStore>,
    dir: PathBuf,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while core.has_channel() {
        ticker.tick().await;
        let files = match store.list(&dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Events directory unreadable");
                continue;
            }
        };
        for path in files {
            match store.read(&path).await {
                Ok(Some(bytes)) => match serde_json::from_slice(&bytes)
                    .map_err(TransportError::from)
                    .and_then(wire::classify_value)
                {
                    Ok(Inbound::Ping(_) | Inbound::Pong(_)) => {}
                    Ok(inbound) => {
                        wire::route_to_pending(&core, inbound);
                    }
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Discarding malformed event file");
                    }
                },
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Event file unreadable");
                    continue;
                }
            }
            if let Err(e) = store.remove(&path).await {
                tracing::debug!(path = %path.display(), error = %e, "Could not remove event file");
            }
        }
    }
}

#[async_trait]
impl Transport for FileExchangeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::FileExchange
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        if self.core.is_initialized() {
            return Ok(());
        }
        self.config.validate()?;
        if self.core.mark_initialized() {
            tracing::info!(exchange_dir = %self.config.exchange_dir.display(), "File exchange transport initialized");
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if !self.core.is_initialized() {
            return Err(TransportError::NotInitialized(TransportKind::FileExchange));
        }
        if self.core.has_channel() {
            return Ok(());
        }
        match self.prepare_layout().await {
            Ok(()) => {
                self.core.mark_connected();
                self.start_event_watcher();
                Ok(())
            }
            Err(e) => {
                let err = TransportError::ConnectionFailed(format!(
                    "exchange directory {} unusable: {e}",
                    self.config.exchange_dir.display()
                ));
                self.core.mark_connect_failed(&err);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        self.core.mark_disconnected("disconnect requested");
        Ok(())
    }

    async fn send_with(
        &self,
        message: Message,
        options: SendOptions,
    ) -> Result<Response, TransportError> {
        self.core
            .execute(message, &options, |message, timeout| {
                self.deliver(message, timeout)
            })
            .await
    }

    async fn perform_health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let result = match self.probe().await {
            Ok(()) => HealthCheckResult::pass(TransportKind::FileExchange, started.elapsed()),
            Err(e) => HealthCheckResult::fail(
                TransportKind::FileExchange,
                started.elapsed(),
                e.to_string(),
            ),
        };
        self.core.record_health_check(&result);
        result
    }

    fn is_available(&self) -> bool {
        self.core.is_available()
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn capabilities(&self) -> TransportCapabilities {
        self.core
            .capabilities(TransportCapabilities::baseline(TransportKind::FileExchange))
    }

    fn health_status(&self) -> HealthStatus {
        self.core.health_status()
    }

    fn events(&self) -> &EventBus<TransportEvent> {
        self.core.events()
    }

    fn pending_count(&self) -> usize {
        self.core.pending().len()
    }
}

impl Drop for FileExchangeTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}
