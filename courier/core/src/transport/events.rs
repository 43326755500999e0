//! Event Registry
//!
//! Publish/subscribe registry keyed by event name. Payloads are typed per
//! event kind through a tagged enum; subscribers get an unbounded channel
//! receiver and may listen to one name or to everything.
//!
//! ```text
//! publish(event) ──► subscribers[event.name()] ──► mpsc receivers
//!                └─► wildcard subscribers
//! ```
//!
//! Dropped receivers are pruned on the next publish. Publishing never blocks
//! and never waits for subscribers to process events.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::TransportError;
use super::types::{HealthCheckResult, Message, TransportKind};

/// Event with a stable routing name
pub trait NamedEvent: Clone + Send + 'static {
    /// Name subscribers register for
    fn name(&self) -> &'static str;
}

/// Name-keyed publish/subscribe registry
pub struct EventBus<E> {
    by_name: Mutex<HashMap<&'static str, Vec<mpsc::UnboundedSender<E>>>>,
    wildcard: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            by_name: Mutex::new(HashMap::new()),
            wildcard: Mutex::new(Vec::new()),
        }
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("named_topics", &self.by_name.lock().len())
            .field("wildcard_subscribers", &self.wildcard.lock().len())
            .finish()
    }
}

impl<E: NamedEvent> EventBus<E> {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published under `name`
    pub fn subscribe(&self, name: &'static str) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.by_name.lock().entry(name).or_default().push(tx);
        rx
    }

    /// Receive every event regardless of name
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.wildcard.lock().push(tx);
        rx
    }

    /// Deliver an event; returns how many subscribers received it
    pub fn publish(&self, event: E) -> usize {
        let mut delivered = 0;
        {
            let mut by_name = self.by_name.lock();
            if let Some(subs) = by_name.get_mut(event.name()) {
                subs.retain(|tx| {
                    let ok = tx.send(event.clone()).is_ok();
                    delivered += usize::from(ok);
                    ok
                });
            }
        }
        self.wildcard.lock().retain(|tx| {
            let ok = tx.send(event.clone()).is_ok();
            delivered += usize::from(ok);
            ok
        });
        delivered
    }

    /// Live subscribers for `name`, wildcard subscribers included
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        let named = self
            .by_name
            .lock()
            .get(name)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count());
        let wildcard = self.wildcard.lock().iter().filter(|tx| !tx.is_closed()).count();
        named + wildcard
    }
}

// ============================================================================
// Transport Events
// ============================================================================

/// Events emitted by a single transport
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Channel established (also after a successful reconnect)
    Connected {
        /// Emitting transport
        kind: TransportKind,
    },
    /// Channel released
    Disconnected {
        /// Emitting transport
        kind: TransportKind,
        /// Why it went away
        reason: String,
    },
    /// Unsolicited inbound message
    MessageReceived {
        /// Emitting transport
        kind: TransportKind,
        /// Inbound message
        message: Message,
    },
    /// Connection-level error
    Error {
        /// Emitting transport
        kind: TransportKind,
        /// What went wrong
        error: TransportError,
    },
    /// Result of a liveness probe
    HealthCheckResult(HealthCheckResult),
    /// A reconnect attempt is scheduled
    Reconnecting {
        /// Emitting transport
        kind: TransportKind,
        /// 1-based attempt number
        attempt: u32,
        /// Backoff before the attempt
        delay: Duration,
    },
}

impl TransportEvent {
    /// `connected`
    pub const CONNECTED: &'static str = "connected";
    /// `disconnected`
    pub const DISCONNECTED: &'static str = "disconnected";
    /// `message`
    pub const MESSAGE: &'static str = "message";
    /// `error`
    pub const ERROR: &'static str = "error";
    /// `health_check_result`
    pub const HEALTH_CHECK_RESULT: &'static str = "health_check_result";
    /// `reconnecting`
    pub const RECONNECTING: &'static str = "reconnecting";

    /// Transport that emitted the event
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Connected { kind }
            | Self::Disconnected { kind, .. }
            | Self::MessageReceived { kind, .. }
            | Self::Error { kind, .. }
            | Self::Reconnecting { kind, .. } => *kind,
            Self::HealthCheckResult(result) => result.kind,
        }
    }
}

impl NamedEvent for TransportEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => Self::CONNECTED,
            Self::Disconnected { .. } => Self::DISCONNECTED,
            Self::MessageReceived { .. } => Self::MESSAGE,
            Self::Error { .. } => Self::ERROR,
            Self::HealthCheckResult(_) => Self::HEALTH_CHECK_RESULT,
            Self::Reconnecting { .. } => Self::RECONNECTING,
        }
    }
}
