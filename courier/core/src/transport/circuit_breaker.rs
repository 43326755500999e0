//! Circuit Breaker
//!
//! Per-transport failure-counting guard. It opens after a run of failures,
//! rejects calls outright while open, and lets exactly one trial call through
//! once the reset timeout has elapsed.
//!
//! ```text
//! +--------+  failure_threshold  +------+   reset_timeout elapsed   +-----------+
//! | Closed | ------------------> | Open | ------------------------> | Half-Open |
//! +--------+                     +------+   (next attempt only)     +-----------+
//!     ^                              ^                                   |
//!     |          trial success       |          trial failure            |
//!     +------------------------------+-----------------------------------+
//! ```
//!
//! # Clock
//!
//! Every transition has an `*_at(now)` form taking a `tokio::time::Instant`,
//! so tests can drive the breaker with explicit instants or a paused runtime.
//!
//! # Thread Safety
//!
//! State lives behind a `parking_lot::Mutex`; each transition is one critical
//! section, so concurrent success/failure reports are applied one at a time.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::types::TransportKind;

// ============================================================================
// State
// ============================================================================

/// Failure-isolation state of one transport
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls execute normally
    #[default]
    Closed,
    /// Calls are rejected without an attempt
    Open,
    /// One trial call is in flight
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Circuit breaker thresholds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial is allowed
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Short timings for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(50),
        }
    }

    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the reset timeout
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

// ============================================================================
// Breaker
// ============================================================================

/// Rejection returned while the circuit refuses calls
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Time until the next trial is allowed, zero if a trial is already running
    pub retry_after: Duration,
}

/// Point-in-time view of a breaker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted so far
    pub failure_count: u32,
    /// When the last failure was recorded
    pub last_failure: Option<Instant>,
    /// When an open circuit will admit a trial
    pub next_attempt: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-transport circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    kind: TransportKind,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// New closed breaker
    #[must_use]
    pub fn new(kind: TransportKind, config: CircuitBreakerConfig) -> Self {
        Self {
            kind,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                next_attempt: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Breaker configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures counted so far
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Snapshot for introspection
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
            next_attempt: inner.next_attempt,
        }
    }

    /// Whether the circuit is open and still inside its reset window
    ///
    /// An open circuit whose reset timeout has elapsed reports `false`: the
    /// next call becomes the half-open trial.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == CircuitState::Open
            && inner.next_attempt.map_or(true, |at| Instant::now() < at)
    }

    /// Whether a call made now would be let through
    #[must_use]
    pub fn allows_attempt(&self) -> bool {
        self.allows_attempt_at(Instant::now())
    }

    /// Whether a call made at `now` would be let through
    #[must_use]
    pub fn allows_attempt_at(&self, now: Instant) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.next_attempt.is_some_and(|at| now >= at),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Admit a call or reject it with [`CircuitOpen`]
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpen`] while the circuit is open and the reset timeout
    /// has not elapsed, or while a half-open trial is already in flight.
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        self.try_acquire_at(Instant::now())
    }

    /// [`Self::try_acquire`] with an explicit clock
    ///
    /// # Errors
    ///
    /// See [`Self::try_acquire`].
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => match inner.next_attempt {
                Some(at) if now >= at => {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(transport = %self.kind, "Circuit breaker half-open, admitting trial call");
                    Ok(())
                }
                Some(at) => Err(CircuitOpen {
                    retry_after: at.saturating_duration_since(now),
                }),
                None => Err(CircuitOpen {
                    retry_after: self.config.reset_timeout,
                }),
            },
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(CircuitOpen {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.next_attempt = None;
            tracing::info!(transport = %self.kind, "Circuit breaker closed, transport recovered");
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// [`Self::record_failure`] with an explicit clock
    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);
        inner.trial_in_flight = false;

        let trip = match inner.state {
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.next_attempt = Some(now + self.config.reset_timeout);
            tracing::warn!(
                transport = %self.kind,
                failure_count = inner.failure_count,
                reset_ms = u64::try_from(self.config.reset_timeout.as_millis()).unwrap_or(u64::MAX),
                "Circuit breaker opened"
            );
        }
    }

    /// Give back a half-open trial slot whose call never reached the channel
    pub fn abandon_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    /// Force the breaker closed (manual intervention)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.next_attempt = None;
        inner.trial_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            TransportKind::Http,
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_reset_timeout(Duration::from_secs(30)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(5);
        let now = Instant::now();
        for _ in 0..4 {
            cb.record_failure_at(now);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_failure_at(now);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());

        let err = cb.try_acquire_at(now).unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(30));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let cb = breaker(2);
        let opened = Instant::now();
        cb.record_failure_at(opened);
        cb.record_failure_at(opened);

        let before = opened + Duration::from_secs(29);
        assert!(cb.try_acquire_at(before).is_err());
        assert!(!cb.allows_attempt_at(before));

        let after = opened + Duration::from_secs(30);
        assert!(cb.allows_attempt_at(after));
        assert!(cb.try_acquire_at(after).is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Second caller while the trial is running
        assert!(cb.try_acquire_at(after).is_err());
    }

    #[test]
    fn test_trial_success_closes() {
        let cb = breaker(1);
        let opened = Instant::now();
        cb.record_failure_at(opened);
        cb.try_acquire_at(opened + Duration::from_secs(31)).unwrap();
        cb.record_success();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert!(snap.next_attempt.is_none());
    }

    #[test]
    fn test_trial_failure_reopens_with_new_deadline() {
        let cb = breaker(1);
        let opened = Instant::now();
        cb.record_failure_at(opened);

        let trial = opened + Duration::from_secs(31);
        cb.try_acquire_at(trial).unwrap();
        cb.record_failure_at(trial);

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.next_attempt, Some(trial + Duration::from_secs(30)));
        assert!(cb.try_acquire_at(trial + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_abandoned_trial_frees_slot() {
        let cb = breaker(1);
        let opened = Instant::now();
        cb.record_failure_at(opened);
        let later = opened + Duration::from_secs(30);
        cb.try_acquire_at(later).unwrap();
        cb.abandon_trial();
        assert!(cb.try_acquire_at(later).is_ok());
    }

    #[test]
    fn test_reset_closes() {
        let cb = breaker(1);
        cb.record_failure();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }
}
