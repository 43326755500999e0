//! Routing
//!
//! Decides which transport carries a message and moves traffic when one
//! goes bad.
//!
//! ```text
//!                  send(message, context)
//!                           |
//!                           v
//!                 +-------------------+        HealthAssessment
//!                 | TransportManager  | <--------------------------+
//!                 +-------------------+                            |
//!                   |       |       |                              |
//!        score/rank |       | walk  | on failure          +----------------+
//!                   v       |       v                     | HealthMonitor  |
//!        +------------------+  +---------------+          +----------------+
//!        | TransportSelector|  | FallbackOrder |                 ^
//!        +------------------+  +---------------+                 | tick
//!                           |                                    |
//!                           v                                    |
//!             websocket / http / file_exchange  -----------------+
//! ```
//!
//! The selector is a pure function of transport state. The manager owns the
//! active pointer, serializes switches, and retries a failed send exactly
//! once on the replacement transport.

#![allow(missing_docs)]

pub mod fallback;
pub mod health_monitor;
pub mod manager;
pub mod selector;

#[cfg(test)]
pub mod test_utils;

pub use fallback::*;
pub use health_monitor::*;
pub use manager::*;
pub use selector::*;
