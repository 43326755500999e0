//! Courier Core - Client-Side Transport Resilience
//!
//! This crate delivers messages from a client application to a backend over
//! the best channel available right now, and keeps delivering when that
//! channel degrades. It has no UI and no business logic: given a message, it
//! returns a response or a well-defined failure.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Host application                          │
//! │                 send(message, context) / events                  │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          ROUTING                                 │
//! │  ┌────────────────────────────┴─────────────────────────────┐    │
//! │  │                    TransportManager                      │    │
//! │  │  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐  │    │
//! │  │  │  Selector  │  │ FallbackOrder│  │  HealthMonitor   │  │    │
//! │  │  └────────────┘  └──────────────┘  └──────────────────┘  │    │
//! │  └──────────────────────────────────────────────────────────┘    │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          TRANSPORTS                              │
//! │  ┌─────────────┐   ┌────────────────┐   ┌────────────────────┐   │
//! │  │  WebSocket  │   │      HTTP      │   │   File exchange    │   │
//! │  └──────┬──────┘   └───────┬────────┘   └─────────┬──────────┘   │
//! │         └──────────────────┼──────────────────────┘              │
//! │            TransportCore: circuit breaker, metrics, health,      │
//! │                     pending requests, events                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`TransportManager`]: owns the transports, picks one, fails over
//! - [`Transport`]: the contract every delivery mechanism implements
//! - [`TransportSelector`]: weighted scoring of candidate transports
//! - [`CircuitBreaker`]: per-transport failure isolation
//! - [`HealthMonitor`]: periodic probes and recommendations
//! - [`CourierConfig`]: every runtime setting, loaded from TOML and env
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use courier_core::{config, Message, TransportManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_config()?;
//!     let manager = Arc::new(TransportManager::from_config(&config));
//!     manager.start();
//!     manager.connect().await?;
//!
//!     let reply = manager
//!         .send(Message::new("chat", serde_json::json!({"text": "hi"})), None)
//!         .await?;
//!     println!("{reply:?}");
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: the three transports and their shared machinery
//! - [`routing`]: selection, fallback, management and health monitoring
//! - [`config`]: TOML file, environment and CLI override loading
//!
//! # No Global State
//!
//! The library never installs a tracing subscriber and never spawns work
//! outside the Tokio runtime it is called from.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod routing;
pub mod transport;

// Re-exports for convenience

// Configuration
pub use config::{load_config, load_config_from_path, ConfigError, ConfigOverrides, CourierConfig};

// Routing
pub use routing::{
    FallbackContext, FallbackOrder, FallbackOrderError, HealthAssessment, HealthMonitor,
    HealthMonitorConfig, ManagerConfig, ManagerError, ManagerEvent, ManagerState, Recommendation,
    ScoreBreakdown, ScoreInput, SelectionContext, SelectionCriteria, SwitchReason,
    TransportManager, TransportSelector,
};

// Transports
pub use transport::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, EventBus, FileExchangeConfig,
    FileExchangeTransport, HealthCheckResult, HealthState, HealthStatus, HttpConfig,
    HttpTransport, Message, Priority, Response, SendOptions, Transport, TransportCapabilities,
    TransportError, TransportEvent, TransportKind, WebSocketConfig, WebSocketTransport,
};
