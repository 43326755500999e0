//! WebSocket heartbeat
//!
//! Periodic `ping` frames keep the socket warm and measure round-trip time.
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |------- ping (id=hb_N) ------->|
//!   |<------ pong (reply_to=hb_N) --|
//!   |                               |
//! ```
//!
//! A missing pong is only counted; it never fails the transport by itself.
//! Liveness verdicts come from the explicit health-check round-trip.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::transport::types::Message;
use crate::transport::wire::PING;

/// Heartbeat settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often to ping
    pub interval: Duration,
    /// How long a ping may go unanswered before it counts as missed
    pub response_timeout: Duration,
    /// Whether to ping at all
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            response_timeout: Duration::from_secs(10),
            enabled: true,
        }
    }
}

impl HeartbeatConfig {
    /// Heartbeat off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Short timings for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(100),
            response_timeout: Duration::from_millis(50),
            enabled: true,
        }
    }

    /// Set the ping interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Round-trip statistics for the socket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LinkHealth {
    /// Pings that went unanswered past the response timeout
    pub missed_pongs: u32,
    /// Most recent round-trip
    pub last_rtt: Option<Duration>,
    /// Exponential moving average of round-trips
    pub avg_rtt: Option<Duration>,
    /// Pings sent
    pub pings_sent: u64,
    /// Pongs matched to a ping
    pub pongs_received: u64,
}

impl LinkHealth {
    fn update_rtt(&mut self, rtt: Duration) {
        const ALPHA: f64 = 0.2;

        self.last_rtt = Some(rtt);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let avg = match self.avg_rtt {
            Some(avg) => Duration::from_nanos(
                (ALPHA * rtt.as_nanos() as f64 + (1.0 - ALPHA) * avg.as_nanos() as f64) as u64,
            ),
            None => rtt,
        };
        self.avg_rtt = Some(avg);
    }
}

/// Outstanding pings and link statistics
#[derive(Debug)]
pub struct HeartbeatState {
    config: HeartbeatConfig,
    seq: u64,
    outstanding: BTreeMap<u64, (String, Instant)>,
    health: LinkHealth,
}

impl HeartbeatState {
    /// Fresh state
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            seq: 0,
            outstanding: BTreeMap::new(),
            health: LinkHealth::default(),
        }
    }

    /// Heartbeat settings
    #[must_use]
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Build the next ping, expiring pings that were never answered
    pub fn prepare_ping(&mut self, now: Instant) -> Message {
        let timeout = self.config.response_timeout;
        let before = self.outstanding.len();
        self.outstanding
            .retain(|_, (_, sent)| now.saturating_duration_since(*sent) < timeout);
        let expired = before - self.outstanding.len();
        if expired > 0 {
            self.health.missed_pongs = self
                .health
                .missed_pongs
                .saturating_add(u32::try_from(expired).unwrap_or(u32::MAX));
            tracing::debug!(missed = self.health.missed_pongs, "Heartbeat pong missed");
        }

        self.seq += 1;
        let id = format!("hb_{}", self.seq);
        self.outstanding.insert(self.seq, (id.clone(), now));
        self.health.pings_sent += 1;
        Message::new(PING, serde_json::json!({ "seq": self.seq })).with_id(id)
    }

    /// Match a pong to an outstanding ping; returns the round-trip
    ///
    /// A pong without `reply_to` answers the oldest outstanding ping.
    pub fn record_pong(&mut self, reply_to: Option<&str>, now: Instant) -> Option<Duration> {
        let seq = match reply_to {
            Some(id) => self
                .outstanding
                .iter()
                .find(|(_, (ping_id, _))| ping_id == id)
                .map(|(seq, _)| *seq)?,
            None => *self.outstanding.keys().next()?,
        };
        let (_, sent) = self.outstanding.remove(&seq)?;
        let rtt = now.saturating_duration_since(sent);
        self.health.pongs_received += 1;
        self.health.missed_pongs = 0;
        self.health.update_rtt(rtt);
        Some(rtt)
    }

    /// Forget outstanding pings (connection replaced)
    pub fn reset_outstanding(&mut self) {
        self.outstanding.clear();
    }

    /// Statistics snapshot
    #[must_use]
    pub fn health(&self) -> LinkHealth {
        self.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert!(config.enabled);
        assert!(!HeartbeatConfig::disabled().enabled);
    }

    #[test]
    fn test_pong_by_id() {
        let mut state = HeartbeatState::new(HeartbeatConfig::for_testing());
        let start = Instant::now();
        let ping = state.prepare_ping(start);
        assert_eq!(ping.message_type, "ping");

        let rtt = state.record_pong(Some(&ping.id), start + Duration::from_millis(7));
        assert_eq!(rtt, Some(Duration::from_millis(7)));
        assert_eq!(state.health().pongs_received, 1);
        assert_eq!(state.record_pong(Some(&ping.id), start), None);
    }

    #[test]
    fn test_anonymous_pong_answers_oldest() {
        let mut state = HeartbeatState::new(HeartbeatConfig::for_testing());
        let start = Instant::now();
        state.prepare_ping(start);
        state.prepare_ping(start + Duration::from_millis(10));

        let rtt = state.record_pong(None, start + Duration::from_millis(20));
        assert_eq!(rtt, Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_unanswered_ping_counts_missed() {
        let mut state = HeartbeatState::new(HeartbeatConfig::for_testing());
        let start = Instant::now();
        state.prepare_ping(start);
        state.prepare_ping(start + Duration::from_millis(100));
        assert_eq!(state.health().missed_pongs, 1);
        assert_eq!(state.health().pings_sent, 2);
    }

    #[test]
    fn test_rtt_average() {
        let mut health = LinkHealth::default();
        health.update_rtt(Duration::from_millis(100));
        health.update_rtt(Duration::from_millis(200));
        assert_eq!(health.last_rtt, Some(Duration::from_millis(200)));
        let avg = health.avg_rtt.unwrap();
        assert!(avg > Duration::from_millis(119) && avg < Duration::from_millis(121));
    }
}
