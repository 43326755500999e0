//! Reconnection state machine
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!      ▲                        │                  │
//!      │                      fail               lost
//!      │                        ▼                  ▼
//!      └──── attempts exhausted ◄──── Reconnecting{attempt}
//! ```
//!
//! The machine only computes states and delays. The supervisor task owns the
//! sleeping, so tests drive it without a clock.

use std::time::Duration;

use serde::Serialize;

/// Backoff parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Attempts before giving up (0 disables reconnection)
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Short timings for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            max_attempts: 3,
        }
    }

    /// No reconnection at all
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// `base_delay × 2^attempt`, capped at `max_delay`; `attempt` is 0-based
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Where the persistent connection stands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none in progress
    #[default]
    Disconnected,
    /// First connect in progress
    Connecting,
    /// Connection open
    Connected,
    /// Connection lost; waiting out the backoff for `attempt`
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
    },
}

/// One scheduled reconnect attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectStep {
    /// 1-based attempt number
    pub attempt: u32,
    /// Backoff to wait before attempting
    pub delay: Duration,
}

/// Connection state plus attempt counter
#[derive(Clone, Debug)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl Reconnector {
    /// Disconnected, no attempts made
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Backoff parameters
    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Attempts made since the last successful connect
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A caller-initiated connect is starting
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// The connection opened; the attempt counter resets
    pub fn connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
    }

    /// A caller-initiated connect failed; no automatic retry
    pub fn connect_failed(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Schedule the next attempt after a loss or failed reconnect
    ///
    /// Returns `None` once `max_attempts` have been made, leaving the
    /// machine disconnected.
    pub fn next_attempt(&mut self) -> Option<ReconnectStep> {
        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::Disconnected;
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting {
            attempt: self.attempts,
        };
        Some(ReconnectStep {
            attempt: self.attempts,
            delay,
        })
    }

    /// The caller closed the connection
    pub fn closed(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
    }
}
