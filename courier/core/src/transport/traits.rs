//! Transport Traits
//!
//! The behavioural contract every concrete transport implements, and the
//! error type every transport operation returns.
//!
//! Implementations take `&self` and keep their state behind interior
//! mutability so the manager can share them as `Arc<dyn Transport>`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::events::{EventBus, TransportEvent};
use super::types::{
    HealthCheckResult, HealthStatus, Message, Response, TransportCapabilities, TransportKind,
};

/// Errors that can occur during transport operations
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Required setting missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Host lacks a primitive this transport needs
    #[error("Unavailable environment: {0}")]
    UnavailableEnvironment(String),
    /// Connect or reconnect failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// `send` or `connect` before `initialize`
    #[error("Transport {0} is not initialized")]
    NotInitialized(TransportKind),
    /// No live channel to deliver on
    #[error("Transport {0} is not connected")]
    NotConnected(TransportKind),
    /// Rejected by the circuit breaker without an attempt
    #[error("Circuit open for {kind}, retry in {retry_after:?}")]
    CircuitOpen {
        /// Transport whose circuit is open
        kind: TransportKind,
        /// Time until a trial call is admitted
        retry_after: Duration,
    },
    /// No response before the deadline
    #[error("Request {id} timed out after {after:?}")]
    Timeout {
        /// Message id
        id: String,
        /// Configured request timeout
        after: Duration,
    },
    /// Underlying channel reported an error
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
    /// Response could not be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// Transport was disconnected while the request was pending
    #[error("Transport disconnected")]
    Disconnected,
    /// Connection dropped underneath a pending request
    #[error("Connection lost")]
    ConnectionLost,
    /// File lock not acquired within the lock timeout
    #[error("Timed out after {waited:?} waiting for lock on {}", path.display())]
    LockTimeout {
        /// Locked path
        path: PathBuf,
        /// How long we waited
        waited: Duration,
    },
    /// Another request with this id is already pending
    #[error("Request {0} is already pending")]
    DuplicateRequest(String),
    /// Local I/O error
    #[error("IO error: {0}")]
    Io(String),
    /// Encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Whether this outcome counts against the circuit breaker and error metrics
    ///
    /// Only outcomes of an attempted delivery count. Rejections that never
    /// reached the channel do not.
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::Timeout { .. }
                | Self::DeliveryFailed(_)
                | Self::MalformedResponse(_)
                | Self::ConnectionLost
                | Self::LockTimeout { .. }
                | Self::Io(_)
                | Self::Serialization(_)
        )
    }

    /// Whether this is a delivery timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Per-call delivery options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Skip the circuit breaker's admission check (outcome is still recorded)
    pub bypass_circuit: bool,
    /// Override the transport's request timeout
    pub timeout: Option<Duration>,
}

impl SendOptions {
    /// Options that skip an open circuit
    #[must_use]
    pub fn bypassing_circuit() -> Self {
        Self {
            bypass_circuit: true,
            timeout: None,
        }
    }

    /// Set a per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Shared behavioural contract of every transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which delivery mechanism this is
    fn kind(&self) -> TransportKind;

    /// Validate configuration and environment; no-op when already initialized
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Establish the underlying channel
    ///
    /// Emits `connected` and marks the transport healthy on success; emits
    /// `error` and stays disconnected on failure.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Reject every pending request with [`TransportError::Disconnected`],
    /// release resources, emit `disconnected`
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Deliver a message with explicit options
    async fn send_with(
        &self,
        message: Message,
        options: SendOptions,
    ) -> Result<Response, TransportError>;

    /// Deliver a message through the circuit breaker
    async fn send(&self, message: Message) -> Result<Response, TransportError> {
        self.send_with(message, SendOptions::default()).await
    }

    /// Transport-specific liveness probe; never fails, always returns a record
    async fn perform_health_check(&self) -> HealthCheckResult;

    /// Initialized and circuit not open
    fn is_available(&self) -> bool;

    /// Connected and available
    fn is_connected(&self) -> bool;

    /// Capabilities with measured latency and reliability folded in
    fn capabilities(&self) -> TransportCapabilities;

    /// Current health snapshot
    fn health_status(&self) -> HealthStatus;

    /// Event registry for this transport
    fn events(&self) -> &EventBus<TransportEvent>;

    /// Number of requests awaiting a response
    fn pending_count(&self) -> usize;
}
