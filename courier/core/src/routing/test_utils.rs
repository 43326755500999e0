//! Routing Test Utilities
//!
//! `MockTransport` is a scriptable transport built on the real
//! [`TransportCore`], so circuit breaking, metrics, health derivation and
//! the pending ledger behave exactly as in the concrete transports while
//! delivery, connect and probe outcomes are switched from the test.
//!
//! # Usage
//!
//! ```ignore
//! let ws = MockTransport::connected(TransportKind::WebSocket);
//! ws.set_failing(true);
//! // ... drive the manager ...
//! assert_eq!(ws.sends(), 1);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::transport::base::TransportCore;
use crate::transport::circuit_breaker::CircuitBreakerConfig;
use crate::transport::events::{EventBus, TransportEvent};
use crate::transport::traits::{SendOptions, Transport, TransportError};
use crate::transport::types::{
    HealthCheckResult, HealthStatus, Message, Response, TransportCapabilities, TransportKind,
};

/// Scriptable in-memory transport
pub struct MockTransport {
    core: TransportCore,
    healthy: AtomicBool,
    failing: AtomicBool,
    hanging: AtomicBool,
    connect_fails: AtomicBool,
    sends: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    health_checks: AtomicUsize,
}

impl MockTransport {
    /// Initialized, not connected; breaker opens after 3 failures
    pub fn new(kind: TransportKind) -> Arc<Self> {
        let core = TransportCore::new(
            kind,
            Duration::from_millis(200),
            CircuitBreakerConfig::for_testing(),
        );
        core.mark_initialized();
        Arc::new(Self {
            core,
            healthy: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            connect_fails: AtomicBool::new(false),
            sends: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
        })
    }

    /// Initialized and connected
    pub fn connected(kind: TransportKind) -> Arc<Self> {
        let transport = Self::new(kind);
        transport.core.mark_connected();
        transport
    }

    /// Shared skeleton
    pub fn core(&self) -> &TransportCore {
        &self.core
    }

    /// Make deliveries fail with a delivery error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make deliveries wait for a response that never comes
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Make health checks pass or fail
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make `connect` fail
    pub fn set_connect_fails(&self, fails: bool) {
        self.connect_fails.store(fails, Ordering::SeqCst);
    }

    /// Deliveries attempted
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// `connect` calls
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// `disconnect` calls
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Health checks run
    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    async fn deliver(&self, message: Message, timeout: Duration) -> Result<Response, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if !self.core.has_channel() {
            return Err(TransportError::NotConnected(self.core.kind()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::DeliveryFailed("scripted failure".to_string()));
        }
        let pending = self.core.pending();
        let (rx, _registered) = pending.register_guarded(&message.id)?;
        if self.hanging.load(Ordering::SeqCst) {
            return pending
                .wait_until(&message.id, rx, Instant::now() + timeout, timeout)
                .await;
        }
        let answer = Response::success(
            message.id.clone(),
            serde_json::json!({ "via": self.core.kind().as_str() }),
        );
        pending.resolve(&message.id, answer);
        pending.wait(&message.id, rx, timeout).await
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.core.kind()
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        self.core.mark_initialized();
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.connect_fails.load(Ordering::SeqCst) {
            let err = TransportError::ConnectionFailed("scripted connect failure".to_string());
            self.core.mark_connect_failed(&err);
            return Err(err);
        }
        if !self.core.has_channel() {
            self.core.mark_connected();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
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
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        let kind = self.core.kind();
        let result = if self.healthy.load(Ordering::SeqCst) {
            HealthCheckResult::pass(kind, Duration::from_millis(5))
        } else {
            HealthCheckResult::fail(kind, Duration::from_millis(5), "scripted probe failure")
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
            .capabilities(TransportCapabilities::baseline(self.core.kind()))
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
