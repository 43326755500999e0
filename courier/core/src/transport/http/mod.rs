//! Request-Response (HTTP) Transport
//!
//! Delivers each message as one `POST`:
//!
//! ```text
//! send ──► pool slot (FIFO) ──► POST {message_path}
//!                                 ├─ 2xx + body  → resolved synchronously
//!                                 ├─ 202         → answer arrives on the event stream
//!                                 └─ other       → delivery failure
//! ```
//!
//! The optional event stream (`GET {events_path}`, Server-Sent Events) carries
//! asynchronous responses and unsolicited server messages. Liveness is a
//! `GET {health_path}`. There is no reconnection concept: availability is
//! the circuit breaker alone.

mod client;
mod pool;
mod sse;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use client::ReqwestChannel;
pub use pool::{PoolError, PoolSlot, PoolStats, RequestPool};
pub use sse::{SseDecoder, SseEvent};

use super::base::TransportCore;
use super::channel::{ChannelReply, RequestChannel};
use super::circuit_breaker::CircuitBreakerConfig;
use super::events::{EventBus, TransportEvent};
use super::traits::{SendOptions, Transport, TransportError};
use super::types::{
    HealthCheckResult, HealthStatus, Message, Response, TransportCapabilities, TransportKind,
};
use super::wire::{self, Inbound};

// ============================================================================
// Configuration
// ============================================================================

/// HTTP transport settings
#[derive(Clone, Debug, PartialEq)]
pub struct HttpConfig {
    /// Server base address, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Path messages are posted to
    pub message_path: String,
    /// Liveness path
    pub health_path: String,
    /// Server event stream path; `None` disables the stream
    pub events_path: Option<String>,
    /// Per-request deadline
    pub request_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Liveness probe timeout
    pub health_timeout: Duration,
    /// Concurrent requests on the wire
    pub pool_size: usize,
    /// Pause before reopening a dropped event stream
    pub event_retry_delay: Duration,
    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            message_path: "/api/messages".to_string(),
            health_path: "/health".to_string(),
            events_path: Some("/api/events".to_string()),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(5),
            pool_size: 6,
            event_retry_delay: Duration::from_secs(2),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl HttpConfig {
    /// Short timings for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            base_url: "http://127.0.0.1:1".to_string(),
            request_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(100),
            health_timeout: Duration::from_millis(100),
            event_retry_delay: Duration::from_millis(20),
            circuit_breaker: CircuitBreakerConfig::for_testing(),
            ..Self::default()
        }
    }

    /// Set the base address
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the pool size
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Disable the server event stream
    #[must_use]
    pub fn without_events(mut self) -> Self {
        self.events_path = None;
        self
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.base_url.trim().is_empty() {
            return Err(TransportError::Configuration(
                "HTTP transport requires a base_url".to_string(),
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(TransportError::Configuration(format!(
                "HTTP base_url must start with http:// or https://, got {}",
                self.base_url
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Request-response transport
pub struct HttpTransport {
    core: Arc<TransportCore>,
    config: HttpConfig,
    channel: RwLock<Option<Arc<dyn RequestChannel>>>,
    pool: RequestPool,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.config.base_url)
            .field("core", &self.core)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Transport using the default reqwest channel (built on `initialize`)
    #[must_use]
    pub fn new(config: HttpConfig) -> Self {
        let core = Arc::new(TransportCore::new(
            TransportKind::Http,
            config.request_timeout,
            config.circuit_breaker.clone(),
        ));
        let pool = RequestPool::new(config.pool_size);
        Self {
            core,
            config,
            channel: RwLock::new(None),
            pool,
            event_task: Mutex::new(None),
        }
    }

    /// Transport over a caller-supplied channel
    #[must_use]
    pub fn with_channel(config: HttpConfig, channel: Arc<dyn RequestChannel>) -> Self {
        let transport = Self::new(config);
        *transport.channel.write() = Some(channel);
        transport
    }

    /// Shared transport skeleton
    #[must_use]
    pub fn core(&self) -> &TransportCore {
        &self.core
    }

    /// Pool statistics
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn channel(&self) -> Result<Arc<dyn RequestChannel>, TransportError> {
        self.channel
            .read()
            .clone()
            .ok_or(TransportError::NotInitialized(TransportKind::Http))
    }

    async fn deliver(
        &self,
        channel: Arc<dyn RequestChannel>,
        message: Message,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        if !self.core.has_channel() {
            return Err(TransportError::NotConnected(TransportKind::Http));
        }
        let id = message.id.clone();
        let body = serde_json::to_value(&message)?;
        let deadline = Instant::now() + timeout;
        let pending = self.core.pending();
        // Dropping the send future anywhere below frees the id
        let (mut rx, _registered) = pending.register_guarded(&id)?;

        let posted = tokio::select! {
            // Rejected while queued or in flight (disconnect)
            early = &mut rx => return early.unwrap_or(Err(TransportError::Disconnected)),
            posted = self.post_in_slot(channel.as_ref(), &id, &body, deadline, timeout) => posted,
        };

        match posted? {
            reply if reply.status == 202 => {
                tracing::debug!(message_id = %id, "Request accepted, awaiting event stream response");
            }
            reply if reply.is_success() => {
                let response = wire::response_from_body(&id, reply.body)?;
                pending.resolve(&id, response);
            }
            reply => {
                return Err(TransportError::DeliveryFailed(format!(
                    "HTTP {} from {}",
                    reply.status, self.config.message_path
                )));
            }
        }

        pending.wait_until(&id, rx, deadline, timeout).await
    }

    /// Queue for a pool slot, then POST with whatever is left of the deadline
    async fn post_in_slot(
        &self,
        channel: &dyn RequestChannel,
        id: &str,
        body: &serde_json::Value,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<ChannelReply, TransportError> {
        let expired = || TransportError::Timeout {
            id: id.to_string(),
            after: timeout,
        };
        let _slot = self
            .pool
            .acquire(deadline.saturating_duration_since(Instant::now()))
            .await
            .map_err(|_| expired())?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(expired());
        }
        channel
            .post_json(&self.config.message_path, body, remaining)
            .await
    }

    fn start_event_stream(&self, channel: Arc<dyn RequestChannel>) {
        let Some(path) = self.config.events_path.clone() else {
            return;
        };
        let core = Arc::clone(&self.core);
        let retry = self.config.event_retry_delay;
        let handle = tokio::spawn(run_event_stream(core, channel, path, retry));
        if let Some(previous) = self.event_task.lock().replace(handle) {
            previous.abort();
        }
    }
}

async fn run_event_stream(
    core: Arc<TransportCore>,
    channel: Arc<dyn RequestChannel>,
    path: String,
    retry: Duration,
) {
    while core.has_channel() {
        match channel.open_events(&path).await {
            Ok(mut stream) => {
                tracing::debug!(path = %path, "Event stream opened");
                while let Some(item) = stream.next().await {
                    match item.and_then(|data| wire::classify(&data)) {
                        Ok(Inbound::Ping(_) | Inbound::Pong(_)) => {}
                        Ok(inbound) => {
                            wire::route_to_pending(&core, inbound);
                        }
                        Err(TransportError::MalformedResponse(reason)) => {
                            tracing::debug!(reason = %reason, "Skipping malformed server event");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Event stream interrupted");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, path = %path, "Event stream unavailable");
            }
        }
        tokio::time::sleep(retry).await;
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        if self.core.is_initialized() {
            return Ok(());
        }
        self.config.validate()?;
        if self.channel.read().is_none() {
            let channel = ReqwestChannel::new(&self.config.base_url, self.config.connect_timeout)?;
            *self.channel.write() = Some(Arc::new(channel));
        }
        if self.core.mark_initialized() {
            tracing::info!(base_url = %self.config.base_url, "HTTP transport initialized");
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let channel = self.channel()?;
        if !self.core.is_initialized() {
            return Err(TransportError::NotInitialized(TransportKind::Http));
        }
        if self.core.has_channel() {
            return Ok(());
        }

        let probe = channel
            .get(&self.config.health_path, self.config.health_timeout)
            .await;
        match probe {
            Ok(reply) if reply.is_success() => {
                self.core.mark_connected();
                self.start_event_stream(channel);
                Ok(())
            }
            Ok(reply) => {
                let err = TransportError::ConnectionFailed(format!(
                    "liveness check returned HTTP {}",
                    reply.status
                ));
                self.core.mark_connect_failed(&err);
                Err(err)
            }
            Err(e) => {
                let err = TransportError::ConnectionFailed(e.to_string());
                self.core.mark_connect_failed(&err);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.event_task.lock().take() {
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
        let channel = self.channel()?;
        self.core
            .execute(message, &options, |message, timeout| {
                self.deliver(channel, message, timeout)
            })
            .await
    }

    async fn perform_health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let result = match self.channel() {
            Ok(channel) => match channel
                .get(&self.config.health_path, self.config.health_timeout)
                .await
            {
                Ok(reply) if reply.is_success() => {
                    HealthCheckResult::pass(TransportKind::Http, started.elapsed())
                }
                Ok(reply) => HealthCheckResult::fail(
                    TransportKind::Http,
                    started.elapsed(),
                    format!("HTTP {}", reply.status),
                ),
                Err(e) => HealthCheckResult::fail(TransportKind::Http, started.elapsed(), e.to_string()),
            },
            Err(e) => HealthCheckResult::fail(TransportKind::Http, Duration::ZERO, e.to_string()),
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
        let mut base = TransportCapabilities::baseline(TransportKind::Http);
        base.max_concurrent_connections = self.pool.capacity();
        base.supports_streaming = self.config.events_path.is_some();
        self.core.capabilities(base)
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

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_task.lock().take() {
            handle.abort();
        }
    }
}
