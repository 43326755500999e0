//! Bidirectional Streaming (WebSocket) Transport
//!
//! One long-lived connection carries every message in both directions.
//!
//! ```text
//!                 ┌──────────── supervisor task ─────────────┐
//! send ──frame──► │ outbound queue ──► sink                  │
//!                 │ stream ──► classify ──► pending / events │
//!                 │ heartbeat tick ──► ping                  │
//!                 │ stream ends ──► Reconnector ──► reopen   │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! Outbound messages are correlated to their responses by id. Inbound frames
//! without a matching pending request are emitted as `message` events.
//!
//! # Connection loss
//!
//! When the socket drops without a `disconnect` call, pending requests are
//! rejected with [`TransportError::ConnectionLost`] and the supervisor reopens
//! the connection with exponential backoff, emitting `reconnecting` before
//! each attempt and `connected` on success. Once attempts are exhausted it
//! emits `error` and stops; the transport stays disconnected until the next
//! explicit `connect`.
//!
//! # Liveness
//!
//! The heartbeat only measures round-trips. The health check is a separate
//! ping/pong round-trip with its own timeout.

#[cfg(feature = "websocket")]
mod connector;
mod heartbeat;
mod reconnect;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[cfg(feature = "websocket")]
pub use connector::TungsteniteConnector;
pub use heartbeat::{HeartbeatConfig, HeartbeatState, LinkHealth};
pub use reconnect::{ConnectionState, ReconnectPolicy, ReconnectStep, Reconnector};

use super::base::TransportCore;
use super::channel::{StreamConnector, StreamPair};
use super::circuit_breaker::CircuitBreakerConfig;
use super::events::{EventBus, TransportEvent};
use super::traits::{SendOptions, Transport, TransportError};
use super::types::{
    HealthCheckResult, HealthStatus, Message, Response, TransportCapabilities, TransportKind,
};
use super::wire::{self, Inbound, PING, PONG};

/// How long `disconnect` waits for the close handshake
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// WebSocket transport settings
#[derive(Clone, Debug, PartialEq)]
pub struct WebSocketConfig {
    /// Server address, e.g. `ws://localhost:8000/ws`
    pub url: String,
    /// Bound on opening the connection
    pub connect_timeout: Duration,
    /// Default per-request deadline
    pub request_timeout: Duration,
    /// Deadline for the health-check pong
    pub ping_timeout: Duration,
    /// Backoff for automatic reconnection
    pub reconnect: ReconnectPolicy,
    /// Periodic ping settings
    pub heartbeat: HeartbeatConfig,
    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl WebSocketConfig {
    /// Short timings for tests; heartbeat off
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_millis(500),
            ping_timeout: Duration::from_millis(100),
            reconnect: ReconnectPolicy::for_testing(),
            heartbeat: HeartbeatConfig::disabled(),
            circuit_breaker: CircuitBreakerConfig::for_testing(),
        }
    }

    /// Set the server address
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the reconnect policy
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the heartbeat
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.url.trim().is_empty() {
            return Err(TransportError::Configuration(
                "WebSocket transport requires a url".to_string(),
            ));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(TransportError::Configuration(format!(
                "WebSocket url must start with ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.ping_timeout.is_zero() {
            return Err(TransportError::Configuration(
                "WebSocket ping_timeout must be positive".to_string(),
            ));
        }
        if self.heartbeat.enabled && self.heartbeat.interval.is_zero() {
            return Err(TransportError::Configuration(
                "WebSocket heartbeat interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the transport handle and its supervisor task
struct Shared {
    core: TransportCore,
    config: WebSocketConfig,
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    reconnector: Mutex<Reconnector>,
    heartbeat: Mutex<HeartbeatState>,
    probes: DashMap<String, oneshot::Sender<()>>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    /// Handle one inbound text frame; returns a frame to send back, if any
    fn handle_frame(&self, text: &str) -> Option<String> {
        match wire::classify(text) {
            Ok(Inbound::Ping(ping)) => {
                let pong = Message::new(PONG, ping.payload)
                    .with_reply_to(ping.id)
                    .prepared();
                serde_json::to_string(&pong).ok()
            }
            Ok(Inbound::Pong(pong)) => {
                self.handle_pong(pong);
                None
            }
            Ok(inbound) => {
                wire::route_to_pending(&self.core, inbound);
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed WebSocket frame");
                None
            }
        }
    }

    fn handle_pong(&self, pong: Message) {
        let now = Instant::now();
        match pong.reply_to.clone() {
            Some(id) if self.probes.contains_key(&id) => {
                if let Some((_, done)) = self.probes.remove(&id) {
                    let _ = done.send(());
                }
            }
            Some(id) if self.core.pending().contains(&id) => {
                wire::route_to_pending(&self.core, Inbound::Pong(pong));
            }
            Some(id) => {
                if let Some(rtt) = self.heartbeat.lock().record_pong(Some(&id), now) {
                    tracing::trace!(
                        rtt_ms = u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX),
                        "Heartbeat pong"
                    );
                }
            }
            None => {
                // An anonymous pong answers the heartbeat and every probe
                self.heartbeat.lock().record_pong(None, now);
                let ids: Vec<String> = self.probes.iter().map(|e| e.key().clone()).collect();
                for id in ids {
                    if let Some((_, done)) = self.probes.remove(&id) {
                        let _ = done.send(());
                    }
                }
            }
        }
    }

    fn outbound(&self) -> Result<mpsc::UnboundedSender<String>, TransportError> {
        if !self.core.has_channel() {
            return Err(TransportError::NotConnected(TransportKind::WebSocket));
        }
        self.outbound
            .read()
            .clone()
            .ok_or(TransportError::NotConnected(TransportKind::WebSocket))
    }
}

async fn open_with_timeout(
    connector: &dyn StreamConnector,
    config: &WebSocketConfig,
) -> Result<StreamPair, TransportError> {
    match tokio::time::timeout(config.connect_timeout, connector.open(&config.url)).await {
        Ok(Ok(pair)) => Ok(pair),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed(e.to_string())),
        Err(_) => Err(TransportError::ConnectionFailed(format!(
            "connect to {} timed out after {:?}",
            config.url, config.connect_timeout
        ))),
    }
}

/// Resolves once the shutdown flag is raised
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *shutdown.borrow_and_update();
        if is_closed || shutdown.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

enum SessionEnd {
    /// Caller closed the connection
    Closed,
    /// Connection dropped underneath us
    Lost(String),
}

/// Clears the channel when the supervisor ends without a requested shutdown
///
/// Covers a panicking session; otherwise the transport would keep reporting
/// a connection nothing services.
struct SupervisorExit {
    shared: Arc<Shared>,
}

impl Drop for SupervisorExit {
    fn drop(&mut self) {
        if *self.shared.shutdown.borrow() || !self.shared.core.has_channel() {
            return;
        }
        let rejected = self
            .shared
            .core
            .mark_channel_lost(&TransportError::ConnectionLost);
        *self.shared.outbound.write() = None;
        tracing::error!(
            transport = %TransportKind::WebSocket,
            rejected,
            "WebSocket supervisor ended unexpectedly"
        );
        self.shared.core.emit(TransportEvent::Error {
            kind: TransportKind::WebSocket,
            error: TransportError::ConnectionLost,
        });
    }
}

async fn supervise(
    shared: Arc<Shared>,
    connector: Arc<dyn StreamConnector>,
    mut pair: StreamPair,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _exit = SupervisorExit {
        shared: Arc::clone(&shared),
    };
    loop {
        let reason = match run_session(&shared, pair, &mut outbound, &mut shutdown).await {
            SessionEnd::Closed => return,
            SessionEnd::Lost(reason) => reason,
        };

        let rejected = shared.core.mark_channel_lost(&TransportError::ConnectionLost);
        shared.heartbeat.lock().reset_outstanding();
        shared.probes.clear();
        // Frames queued for the dead socket belong to requests just rejected
        while outbound.try_recv().is_ok() {}
        tracing::warn!(
            transport = %TransportKind::WebSocket,
            rejected,
            reason = %reason,
            "WebSocket connection lost"
        );

        match reconnect(&shared, connector.as_ref(), &mut shutdown).await {
            Some(next) => pair = next,
            None => return,
        }
    }
}

async fn run_session(
    shared: &Shared,
    pair: StreamPair,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let StreamPair {
        mut sink,
        mut stream,
    } = pair;
    let heartbeat = &shared.config.heartbeat;
    let mut ticker = (heartbeat.enabled && !heartbeat.interval.is_zero()).then(|| {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    loop {
        tokio::select! {
            () = closed(shutdown) => {
                let _ = sink.close().await;
                return SessionEnd::Closed;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return SessionEnd::Closed;
                };
                if let Err(e) = sink.send(frame).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(text)) => {
                    if let Some(reply) = shared.handle_frame(&text) {
                        if let Err(e) = sink.send(reply).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                }
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("closed by peer".to_string()),
            },
            () = heartbeat_tick(&mut ticker) => {
                let ping = shared.heartbeat.lock().prepare_ping(Instant::now()).prepared();
                match serde_json::to_string(&ping) {
                    Ok(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Heartbeat ping not encodable"),
                }
            }
        }
    }
}

/// Next heartbeat tick; never resolves with the heartbeat off
async fn heartbeat_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn reconnect(
    shared: &Shared,
    connector: &dyn StreamConnector,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<StreamPair> {
    loop {
        let step = shared.reconnector.lock().next_attempt();
        let Some(step) = step else {
            let error = TransportError::ConnectionFailed(format!(
                "gave up after {} reconnect attempts",
                shared.config.reconnect.max_attempts
            ));
            tracing::error!(transport = %TransportKind::WebSocket, error = %error, "Reconnection exhausted");
            shared.core.emit(TransportEvent::Error {
                kind: TransportKind::WebSocket,
                error,
            });
            return None;
        };

        tracing::info!(
            transport = %TransportKind::WebSocket,
            attempt = step.attempt,
            delay_ms = u64::try_from(step.delay.as_millis()).unwrap_or(u64::MAX),
            "Attempting reconnection"
        );
        shared.core.emit(TransportEvent::Reconnecting {
            kind: TransportKind::WebSocket,
            attempt: step.attempt,
            delay: step.delay,
        });

        tokio::select! {
            () = tokio::time::sleep(step.delay) => {}
            () = closed(shutdown) => return None,
        }

        match open_with_timeout(connector, &shared.config).await {
            Ok(pair) => {
                shared.reconnector.lock().connected();
                shared.core.mark_connected();
                return Some(pair);
            }
            Err(e) => {
                tracing::debug!(attempt = step.attempt, error = %e, "Reconnection attempt failed");
            }
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Bidirectional streaming transport
pub struct WebSocketTransport {
    shared: Arc<Shared>,
    connector: RwLock<Option<Arc<dyn StreamConnector>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.shared.config.url)
            .field("core", &self.shared.core)
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Transport using the default connector (chosen on `initialize`)
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        let core = TransportCore::new(
            TransportKind::WebSocket,
            config.request_timeout,
            config.circuit_breaker.clone(),
        );
        let (shutdown, _) = watch::channel(false);
        let shared = Shared {
            core,
            reconnector: Mutex::new(Reconnector::new(config.reconnect.clone())),
            heartbeat: Mutex::new(HeartbeatState::new(config.heartbeat.clone())),
            outbound: RwLock::new(None),
            probes: DashMap::new(),
            shutdown,
            config,
        };
        Self {
            shared: Arc::new(shared),
            connector: RwLock::new(None),
            supervisor: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Transport over a caller-supplied connector
    #[must_use]
    pub fn with_connector(config: WebSocketConfig, connector: Arc<dyn StreamConnector>) -> Self {
        let transport = Self::new(config);
        *transport.connector.write() = Some(connector);
        transport
    }

    /// Shared transport skeleton
    #[must_use]
    pub fn core(&self) -> &TransportCore {
        &self.shared.core
    }

    /// Where the persistent connection stands
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.reconnector.lock().state()
    }

    /// Heartbeat round-trip statistics
    #[must_use]
    pub fn link_health(&self) -> LinkHealth {
        self.shared.heartbeat.lock().health()
    }

    fn connector(&self) -> Result<Arc<dyn StreamConnector>, TransportError> {
        self.connector
            .read()
            .clone()
            .ok_or(TransportError::NotInitialized(TransportKind::WebSocket))
    }

    async fn deliver(&self, message: Message, timeout: Duration) -> Result<Response, TransportError> {
        let outbound = self.shared.outbound()?;
        let id = message.id.clone();
        let frame = serde_json::to_string(&message)?;
        let pending = self.shared.core.pending();
        let (rx, _registered) = pending.register_guarded(&id)?;
        if outbound.send(frame).is_err() {
            return Err(TransportError::NotConnected(TransportKind::WebSocket));
        }
        pending.wait(&id, rx, timeout).await
    }

    /// Explicit ping/pong round-trip
    async fn probe(&self) -> Result<(), TransportError> {
        let outbound = self.shared.outbound()?;
        let id = format!("probe_{}", hex::encode(rand::random::<[u8; 6]>()));
        let (done_tx, done_rx) = oneshot::channel();
        self.shared.probes.insert(id.clone(), done_tx);

        let ping = Message::new(PING, serde_json::json!({ "probe": true }))
            .with_id(id.clone())
            .prepared();
        let sent = serde_json::to_string(&ping)
            .map_err(TransportError::from)
            .and_then(|frame| {
                outbound
                    .send(frame)
                    .map_err(|_| TransportError::NotConnected(TransportKind::WebSocket))
            });
        if let Err(e) = sent {
            self.shared.probes.remove(&id);
            return Err(e);
        }

        let timeout = self.shared.config.ping_timeout;
        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::ConnectionLost),
            Err(_) => {
                self.shared.probes.remove(&id);
                Err(TransportError::Timeout { id, after: timeout })
            }
        }
    }

    async fn stop_supervisor(&self) {
        self.shared.shutdown.send_replace(true);
        *self.shared.outbound.write() = None;
        let handle = self.supervisor.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        if self.shared.core.is_initialized() {
            return Ok(());
        }
        self.shared.config.validate()?;
        if self.connector.read().is_none() {
            #[cfg(feature = "websocket")]
            {
                *self.connector.write() = Some(Arc::new(TungsteniteConnector));
            }
            #[cfg(not(feature = "websocket"))]
            {
                return Err(TransportError::UnavailableEnvironment(
                    "built without WebSocket support".to_string(),
                ));
            }
        }
        if self.shared.core.mark_initialized() {
            tracing::info!(url = %self.shared.config.url, "WebSocket transport initialized");
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let connector = self.connector()?;
        if !self.shared.core.is_initialized() {
            return Err(TransportError::NotInitialized(TransportKind::WebSocket));
        }
        let _guard = self.connect_lock.lock().await;
        if self.shared.core.has_channel() {
            return Ok(());
        }

        // A supervisor still cycling through reconnect attempts is replaced
        if let Some(previous) = self.supervisor.lock().take() {
            previous.abort();
        }

        self.shared.reconnector.lock().begin_connect();
        match open_with_timeout(connector.as_ref(), &self.shared.config).await {
            Ok(pair) => {
                let (tx, rx) = mpsc::unbounded_channel();
                *self.shared.outbound.write() = Some(tx);
                self.shared.shutdown.send_replace(false);
                let shutdown = self.shared.shutdown.subscribe();
                self.shared.heartbeat.lock().reset_outstanding();
                self.shared.reconnector.lock().connected();
                self.shared.core.mark_connected();

                let handle = tokio::spawn(supervise(
                    Arc::clone(&self.shared),
                    connector,
                    pair,
                    rx,
                    shutdown,
                ));
                *self.supervisor.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.reconnector.lock().connect_failed();
                self.shared.core.mark_connect_failed(&e);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        self.stop_supervisor().await;
        self.shared.reconnector.lock().closed();
        self.shared.probes.clear();
        self.shared.core.mark_disconnected("disconnect requested");
        Ok(())
    }

    async fn send_with(
        &self,
        message: Message,
        options: SendOptions,
    ) -> Result<Response, TransportError> {
        self.shared
            .core
            .execute(message, &options, |message, timeout| {
                self.deliver(message, timeout)
            })
            .await
    }

    async fn perform_health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let result = match self.probe().await {
            Ok(()) => HealthCheckResult::pass(TransportKind::WebSocket, started.elapsed()),
            Err(e) => {
                HealthCheckResult::fail(TransportKind::WebSocket, started.elapsed(), e.to_string())
            }
        };
        self.shared.core.record_health_check(&result);
        result
    }

    fn is_available(&self) -> bool {
        self.shared.core.is_available()
    }

    fn is_connected(&self) -> bool {
        self.shared.core.is_connected()
    }

    fn capabilities(&self) -> TransportCapabilities {
        self.shared
            .core
            .capabilities(TransportCapabilities::baseline(TransportKind::WebSocket))
    }

    fn health_status(&self) -> HealthStatus {
        self.shared.core.health_status()
    }

    fn events(&self) -> &EventBus<TransportEvent> {
        self.shared.core.events()
    }

    fn pending_count(&self) -> usize {
        self.shared.core.pending().len()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}
