//! Capability & Health Model
//!
//! Plain data describing what a transport supports and how well it is
//! currently performing, plus the logical message contract every transport
//! maps onto its physical encoding.
//!
//! # Wire contract
//!
//! ```text
//! Message  { id, type, payload, timestamp, reply_to? }
//! Response { id, success, payload? | error?, timestamp }
//! ```
//!
//! Timestamps are Unix milliseconds.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Transport Kind
// ============================================================================

/// Enumerated delivery mechanism
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Request-response over HTTP
    Http,
    /// Bidirectional stream over WebSocket
    #[serde(rename = "websocket", alias = "web_socket")]
    WebSocket,
    /// Request and response files in a shared directory
    FileExchange,
}

impl TransportKind {
    /// Every kind, in default fallback order
    pub const ALL: [TransportKind; 3] = [Self::WebSocket, Self::Http, Self::FileExchange];

    /// Stable lowercase name used in logs, config and events
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
            Self::FileExchange => "file_exchange",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "request_response" | "request-response" => Ok(Self::Http),
            "websocket" | "ws" | "stream" | "bidirectional_stream" => Ok(Self::WebSocket),
            "file_exchange" | "file-exchange" | "file" | "filesystem" => Ok(Self::FileExchange),
            other => Err(format!("unknown transport kind: {other}")),
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Static and measured description of a transport
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportCapabilities {
    /// Pushes data without polling
    pub supports_realtime: bool,
    /// Server may initiate messages
    pub supports_bidirectional: bool,
    /// Reads and writes files directly
    pub supports_file_access: bool,
    /// Supports incremental/streamed responses
    pub supports_streaming: bool,
    /// Largest message the transport accepts, in bytes
    pub max_message_size: usize,
    /// Mean latency of successful sends
    pub average_latency: Duration,
    /// Concurrent in-flight deliveries the transport allows
    pub max_concurrent_connections: usize,
    /// `successes / (successes + errors)`, 1.0 before any send
    pub reliability: f64,
    /// Host environments the transport works in
    pub supported_environments: Vec<String>,
}

impl TransportCapabilities {
    /// Static capabilities for a kind, before any metrics are folded in
    #[must_use]
    pub fn baseline(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Http => Self {
                supports_realtime: false,
                supports_bidirectional: false,
                supports_file_access: false,
                supports_streaming: true,
                max_message_size: 10 * 1024 * 1024,
                average_latency: Duration::ZERO,
                max_concurrent_connections: 6,
                reliability: 1.0,
                supported_environments: vec!["desktop".into(), "mobile".into(), "web".into()],
            },
            TransportKind::WebSocket => Self {
                supports_realtime: true,
                supports_bidirectional: true,
                supports_file_access: false,
                supports_streaming: true,
                max_message_size: 16 * 1024 * 1024,
                average_latency: Duration::ZERO,
                max_concurrent_connections: 1,
                reliability: 1.0,
                supported_environments: vec!["desktop".into(), "mobile".into(), "web".into()],
            },
            TransportKind::FileExchange => Self {
                supports_realtime: false,
                supports_bidirectional: false,
                supports_file_access: true,
                supports_streaming: false,
                max_message_size: 50 * 1024 * 1024,
                average_latency: Duration::ZERO,
                max_concurrent_connections: 1,
                reliability: 1.0,
                supported_environments: vec!["desktop".into()],
            },
        }
    }
}

/// Reliability from send outcomes; optimistic when nothing has been sent
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn reliability(successes: u64, errors: u64) -> f64 {
    let total = successes + errors;
    if total == 0 {
        1.0
    } else {
        successes as f64 / total as f64
    }
}

// ============================================================================
// Health
// ============================================================================

/// Current operating condition of one transport
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Working normally
    Healthy,
    /// Working with errors or slowness
    Degraded,
    /// Repeated failures
    Failing,
    /// No usable channel
    #[default]
    Disconnected,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failing => write!(f, "failing"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Health snapshot of one transport
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Current state
    pub state: HealthState,
    /// Unix millis of the last health check, if any
    pub last_check: Option<u64>,
    /// Latency observed by the last check or send
    pub latency: Duration,
    /// Errors / sends over the transport lifetime
    pub error_rate: f64,
    /// Failures since the last successful check or send
    pub consecutive_failures: u32,
    /// Time since the current connection was established
    pub uptime: Duration,
}

/// Outcome of one liveness probe; never an error
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Transport that was probed
    pub kind: TransportKind,
    /// Whether the probe passed
    pub healthy: bool,
    /// Round-trip time of the probe
    pub latency: Duration,
    /// Failure description when `healthy` is false
    pub error: Option<String>,
    /// Unix millis when the probe finished
    pub checked_at: u64,
}

impl HealthCheckResult {
    /// A passing probe
    #[must_use]
    pub fn pass(kind: TransportKind, latency: Duration) -> Self {
        Self {
            kind,
            healthy: true,
            latency,
            error: None,
            checked_at: now_millis(),
        }
    }

    /// A failing probe
    #[must_use]
    pub fn fail(kind: TransportKind, latency: Duration, error: impl Into<String>) -> Self {
        Self {
            kind,
            healthy: false,
            latency,
            error: Some(error.into()),
            checked_at: now_millis(),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Urgency hint carried by a selection context
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work
    Low,
    /// Default
    #[default]
    Normal,
    /// User is waiting
    High,
    /// Must go out now
    Critical,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" | "urgent" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// One outbound unit of work
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id; generated on send when empty
    #[serde(default)]
    pub id: String,
    /// Type tag
    #[serde(rename = "type")]
    pub message_type: String,
    /// Arbitrary payload
    #[serde(default, alias = "data")]
    pub payload: serde_json::Value,
    /// Unix millis; stamped on send when zero
    #[serde(default)]
    pub timestamp: u64,
    /// Id of the message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Message {
    /// New message without id or timestamp
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: String::new(),
            message_type: message_type.into(),
            payload,
            timestamp: 0,
            reply_to: None,
        }
    }

    /// Set a caller-chosen id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Mark as an answer to another message
    #[must_use]
    pub fn with_reply_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to = Some(id.into());
        self
    }

    /// Assign an id and timestamp if missing
    #[must_use]
    pub fn prepared(mut self) -> Self {
        if self.id.is_empty() {
            self.id = generate_message_id();
        }
        if self.timestamp == 0 {
            self.timestamp = now_millis();
        }
        self
    }
}

/// Result of a message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the message this answers
    #[serde(default)]
    pub id: String,
    /// Whether the remote side handled the message
    pub success: bool,
    /// Result payload on success
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "data")]
    pub payload: Option<serde_json::Value>,
    /// Error description on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix millis
    #[serde(default)]
    pub timestamp: u64,
}

impl Response {
    /// Successful response
    #[must_use]
    pub fn success(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            payload: Some(payload),
            error: None,
            timestamp: now_millis(),
        }
    }

    /// Failed response
    #[must_use]
    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            payload: None,
            error: Some(error.into()),
            timestamp: now_millis(),
        }
    }
}

/// Generate a unique message id
#[must_use]
pub fn generate_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// Current wall-clock time in Unix milliseconds
#[must_use]
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
