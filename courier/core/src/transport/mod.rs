//! Transport Layer
//!
//! Three interchangeable delivery mechanisms behind one contract:
//!
//! - [`HttpTransport`]: one request per message, optional server event stream
//! - [`WebSocketTransport`]: one long-lived bidirectional connection
//! - [`FileExchangeTransport`]: request/response files in a shared directory
//!
//! Each embeds a [`TransportCore`] (circuit breaker, metrics, health, pending
//! requests, events) and supplies only its delivery, connect and probe logic.
//! The host environment is reached through the traits in [`channel`], so
//! every transport runs against in-memory fakes in tests.

pub mod base;
pub mod channel;
pub mod circuit_breaker;
pub mod events;
pub mod factory;
pub mod file_exchange;
pub mod http;
pub mod pending;
pub mod traits;
pub mod types;
pub mod websocket;
pub mod wire;

// Re-exports for convenience
pub use base::{TransportCore, TransportMetrics};
pub use channel::{
    ChannelReply, EventStream, FileStore, FrameSink, FrameStream, RequestChannel, StreamConnector,
    StreamPair,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitSnapshot, CircuitState,
};
pub use events::{EventBus, NamedEvent, TransportEvent};
pub use factory::{create_transport, create_transports};
pub use file_exchange::{FileExchangeConfig, FileExchangeTransport, LocalFileStore, LockManager};
pub use http::{HttpConfig, HttpTransport, PoolStats, ReqwestChannel};
pub use pending::PendingRequests;
pub use traits::{SendOptions, Transport, TransportError};
pub use types::{
    HealthCheckResult, HealthState, HealthStatus, Message, Priority, Response,
    TransportCapabilities, TransportKind,
};
#[cfg(feature = "websocket")]
pub use websocket::TungsteniteConnector;
pub use websocket::{
    ConnectionState, HeartbeatConfig, LinkHealth, ReconnectPolicy, WebSocketConfig,
    WebSocketTransport,
};
