//! Base Transport
//!
//! `TransportCore` is the skeleton every concrete transport embeds:
//!
//! - lifecycle flags (initialized, connected, connected-since)
//! - the circuit breaker and breaker-wrapped execution of deliveries
//! - rolling send metrics feeding `reliability` and `average_latency`
//! - health status bookkeeping for sends and health checks
//! - the pending-request ledger and the event registry
//!
//! Concrete transports supply only the delivery closure, the connect logic
//! and the health probe.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::events::{EventBus, TransportEvent};
use super::pending::PendingRequests;
use super::traits::{SendOptions, TransportError};
use super::types::{
    reliability, HealthCheckResult, HealthState, HealthStatus, Message, Response,
    TransportCapabilities, TransportKind,
};

/// Consecutive failures at which a transport is `failing`
pub const FAILING_AFTER: u32 = 3;

/// Error rate above which a transport is `degraded`
pub const DEGRADED_ERROR_RATE: f64 = 0.1;

// ============================================================================
// Metrics
// ============================================================================

/// Rolling send metrics
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TransportMetrics {
    /// Deliveries attempted
    pub messages_sent: u64,
    /// Deliveries that produced a response
    pub successes: u64,
    /// Deliveries that failed
    pub errors: u64,
    /// Summed latency of successful deliveries
    pub total_latency_ms: u64,
}

impl TransportMetrics {
    /// `successes / (successes + errors)`, 1.0 with no history
    #[must_use]
    pub fn reliability(&self) -> f64 {
        reliability(self.successes, self.errors)
    }

    /// Mean latency of successful deliveries
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        (self.successes > 0).then(|| Duration::from_millis(self.total_latency_ms / self.successes))
    }

    /// Errors over all counted outcomes
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        let total = self.successes + self.errors;
        if total == 0 {
            0.0
        } else {
            self.errors as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct MetricsAtomic {
    messages_sent: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl MetricsAtomic {
    fn snapshot(&self) -> TransportMetrics {
        TransportMetrics {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Core
// ============================================================================

/// Shared state and behaviour of every transport
pub struct TransportCore {
    kind: TransportKind,
    request_timeout: Duration,
    breaker: CircuitBreaker,
    pending: PendingRequests,
    events: EventBus<TransportEvent>,
    initialized: AtomicBool,
    connected: AtomicBool,
    connected_since: Mutex<Option<Instant>>,
    metrics: MetricsAtomic,
    health: RwLock<HealthStatus>,
}

impl std::fmt::Debug for TransportCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCore")
            .field("kind", &self.kind)
            .field("initialized", &self.is_initialized())
            .field("connected", &self.connected.load(Ordering::Acquire))
            .field("circuit", &self.breaker.state())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Half-open trial slot held across one delivery
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl TrialSlot<'_> {
    /// Hand the slot back to the caller, who records the outcome
    fn release(mut self) -> bool {
        std::mem::replace(&mut self.held, false)
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.breaker.abandon_trial();
        }
    }
}

impl TransportCore {
    /// New core for `kind`
    #[must_use]
    pub fn new(
        kind: TransportKind,
        request_timeout: Duration,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            kind,
            request_timeout,
            breaker: CircuitBreaker::new(kind, breaker_config),
            pending: PendingRequests::new(),
            events: EventBus::new(),
            initialized: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            connected_since: Mutex::new(None),
            metrics: MetricsAtomic::default(),
            health: RwLock::new(HealthStatus::default()),
        }
    }

    /// Transport kind
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Default per-request deadline
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Circuit breaker
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Pending-request ledger
    #[must_use]
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Event registry
    #[must_use]
    pub fn events(&self) -> &EventBus<TransportEvent> {
        &self.events
    }

    /// Publish an event
    pub fn emit(&self, event: TransportEvent) {
        self.events.publish(event);
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Whether `initialize` has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Mark initialized; `false` if it already was
    pub fn mark_initialized(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }

    /// Initialized and circuit not open
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.is_initialized() && !self.breaker.is_open()
    }

    /// Raw connected flag, ignoring availability
    #[must_use]
    pub fn has_channel(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connected flag and available
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.has_channel() && self.is_available()
    }

    /// Record a successful connect: mark healthy and emit `connected`
    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
        *self.connected_since.lock() = Some(Instant::now());
        self.health.write().state = HealthState::Healthy;
        tracing::info!(transport = %self.kind, "Transport connected");
        self.emit(TransportEvent::Connected { kind: self.kind });
    }

    /// Record a failed connect: stay disconnected and emit `error`
    pub fn mark_connect_failed(&self, error: &TransportError) {
        self.connected.store(false, Ordering::Release);
        *self.connected_since.lock() = None;
        self.health.write().state = HealthState::Disconnected;
        tracing::warn!(transport = %self.kind, error = %error, "Transport connect failed");
        self.emit(TransportEvent::Error {
            kind: self.kind,
            error: error.clone(),
        });
    }

    /// Drop the channel without a caller asking (connection lost)
    ///
    /// Pending requests are rejected with `pending_error`.
    pub fn mark_channel_lost(&self, pending_error: &TransportError) -> usize {
        self.connected.store(false, Ordering::Release);
        *self.connected_since.lock() = None;
        self.health.write().state = HealthState::Disconnected;
        self.pending.reject_all(pending_error)
    }

    /// Disconnect bookkeeping: reject pending, mark disconnected, emit `disconnected`
    pub fn mark_disconnected(&self, reason: &str) -> usize {
        let rejected = self.mark_channel_lost(&TransportError::Disconnected);
        tracing::info!(transport = %self.kind, rejected, reason, "Transport disconnected");
        self.emit(TransportEvent::Disconnected {
            kind: self.kind,
            reason: reason.to_string(),
        });
        rejected
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Run a delivery through the circuit breaker and metrics
    ///
    /// `deliver` receives the prepared message (id and timestamp assigned)
    /// and the deadline to apply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotInitialized`], [`TransportError::CircuitOpen`]
    /// without attempting delivery, or the delivery's own error.
    pub async fn execute<F, Fut>(
        &self,
        message: Message,
        options: &SendOptions,
        deliver: F,
    ) -> Result<Response, TransportError>
    where
        F: FnOnce(Message, Duration) -> Fut,
        Fut: Future<Output = Result<Response, TransportError>>,
    {
        if !self.is_initialized() {
            return Err(TransportError::NotInitialized(self.kind));
        }
        let message = message.prepared();
        let message_id = message.id.clone();

        let admitted = if options.bypass_circuit {
            if self.breaker.is_open() {
                tracing::warn!(transport = %self.kind, message_id = %message_id, "Bypassing open circuit");
            }
            false
        } else {
            self.breaker
                .try_acquire()
                .map_err(|open| TransportError::CircuitOpen {
                    kind: self.kind,
                    retry_after: open.retry_after,
                })?;
            true
        };
        // Gives a half-open trial slot back if the caller drops this future
        let trial = TrialSlot {
            breaker: &self.breaker,
            held: admitted,
        };

        let timeout = options.timeout.unwrap_or(self.request_timeout);
        let started = Instant::now();
        let result = deliver(message, timeout).await;
        let elapsed = started.elapsed();
        let admitted = trial.release();

        match &result {
            Ok(_) => {
                self.breaker.record_success();
                self.record_send_success(elapsed);
            }
            Err(e) if e.counts_as_failure() => {
                self.breaker.record_failure();
                self.record_send_failure();
                tracing::debug!(transport = %self.kind, message_id = %message_id, error = %e, "Delivery failed");
            }
            Err(_) => {
                if admitted {
                    self.breaker.abandon_trial();
                }
            }
        }
        result
    }

    fn record_send_success(&self, latency: Duration) {
        self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .total_latency_ms
            .fetch_add(millis(latency), Ordering::Relaxed);

        let mut health = self.health.write();
        health.consecutive_failures = 0;
        health.latency = latency;
        self.refresh_state(&mut health);
    }

    fn record_send_failure(&self) {
        self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.metrics.errors.fetch_add(1, Ordering::Relaxed);

        let mut health = self.health.write();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        self.refresh_state(&mut health);
    }

    /// Fold a health-check result into the status and emit it
    pub fn record_health_check(&self, result: &HealthCheckResult) {
        {
            let mut health = self.health.write();
            health.last_check = Some(result.checked_at);
            health.latency = result.latency;
            if result.healthy {
                health.consecutive_failures = 0;
            } else {
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            }
            self.refresh_state(&mut health);
        }
        if result.healthy {
            tracing::debug!(transport = %self.kind, latency_ms = millis(result.latency), "Health check passed");
        } else {
            tracing::warn!(
                transport = %self.kind,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Health check failed"
            );
        }
        self.emit(TransportEvent::HealthCheckResult(result.clone()));
    }

    fn refresh_state(&self, health: &mut HealthStatus) {
        let metrics = self.metrics.snapshot();
        health.error_rate = metrics.error_rate();
        health.state = if !self.has_channel() {
            HealthState::Disconnected
        } else if health.consecutive_failures >= FAILING_AFTER {
            HealthState::Failing
        } else if health.consecutive_failures > 0 || health.error_rate > DEGRADED_ERROR_RATE {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
    }

    /// Override the health state (operator intervention, tests)
    pub fn force_health_state(&self, state: HealthState) {
        self.health.write().state = state;
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Metrics snapshot
    #[must_use]
    pub fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    /// Health snapshot with current uptime
    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        let mut status = self.health.read().clone();
        status.uptime = self
            .connected_since
            .lock()
            .map_or(Duration::ZERO, |since| since.elapsed());
        status
    }

    /// Static capabilities with measured latency and reliability folded in
    #[must_use]
    pub fn capabilities(&self, mut base: TransportCapabilities) -> TransportCapabilities {
        let metrics = self.metrics.snapshot();
        base.reliability = metrics.reliability();
        base.average_latency = metrics
            .average_latency()
            .unwrap_or_else(|| self.health.read().latency);
        base
    }
}
