//! Health Monitor
//!
//! Runs a fixed-interval health check per transport and publishes a
//! [`HealthAssessment`] after every check.
//!
//! ```text
//! +-----------+  tick  +----------------------+  assess  +-------------------+
//! | interval  | -----> | perform_health_check | -------> | HealthAssessment  | --> subscribers
//! +-----------+        +----------------------+          +-------------------+
//! ```
//!
//! Each watch task holds only a weak reference to its transport, so
//! monitoring ends on its own once the transport is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::transport::events::{EventBus, NamedEvent};
use crate::transport::traits::Transport;
use crate::transport::types::{now_millis, HealthState, HealthStatus, TransportKind};

// ============================================================================
// Configuration
// ============================================================================

/// Health monitor settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthMonitorConfig {
    /// Time between checks of one transport
    pub interval: Duration,
    /// Consecutive failures above which a transport is avoided
    pub avoid_after_failures: u32,
    /// Healthy transports faster than this are preferred
    pub prefer_latency: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            avoid_after_failures: 2,
            prefer_latency: Duration::from_millis(1000),
        }
    }
}

impl HealthMonitorConfig {
    /// Short interval for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(50),
            ..Self::default()
        }
    }

    /// Set the check interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

// ============================================================================
// Assessment
// ============================================================================

/// What the monitor thinks of a transport right now
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Healthy and fast
    Prefer,
    /// Usable
    Acceptable,
    /// Should not carry traffic
    Avoid,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prefer => write!(f, "prefer"),
            Self::Acceptable => write!(f, "acceptable"),
            Self::Avoid => write!(f, "avoid"),
        }
    }
}

/// Verdict on one transport with the metrics behind it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthAssessment {
    /// Assessed transport
    pub kind: TransportKind,
    /// Verdict
    pub recommendation: Recommendation,
    /// Health snapshot the verdict is based on
    pub status: HealthStatus,
    /// Initialized and circuit not open
    pub available: bool,
    /// Send reliability
    pub reliability: f64,
    /// Unix millis of the assessment
    pub assessed_at: u64,
}

impl NamedEvent for HealthAssessment {
    fn name(&self) -> &'static str {
        "health_assessment"
    }
}

/// Derive a recommendation from a health snapshot
#[must_use]
pub fn recommend(status: &HealthStatus, available: bool, config: &HealthMonitorConfig) -> Recommendation {
    let down = matches!(status.state, HealthState::Failing | HealthState::Disconnected);
    if !available || down || status.consecutive_failures > config.avoid_after_failures {
        Recommendation::Avoid
    } else if status.state == HealthState::Healthy && status.latency < config.prefer_latency {
        Recommendation::Prefer
    } else {
        Recommendation::Acceptable
    }
}

/// Assess a transport from its current state
#[must_use]
pub fn assess(transport: &dyn Transport, config: &HealthMonitorConfig) -> HealthAssessment {
    let status = transport.health_status();
    let available = transport.is_available();
    HealthAssessment {
        kind: transport.kind(),
        recommendation: recommend(&status, available, config),
        status,
        available,
        reliability: transport.capabilities().reliability,
        assessed_at: now_millis(),
    }
}

// ============================================================================
// Monitor
// ============================================================================

type AssessmentMap = RwLock<HashMap<TransportKind, HealthAssessment>>;

/// Periodic health checker for a set of transports
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    tasks: Mutex<HashMap<TransportKind, JoinHandle<()>>>,
    latest: Arc<AssessmentMap>,
    events: Arc<EventBus<HealthAssessment>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.config.interval)
            .field("watching", &self.tasks.lock().len())
            .finish()
    }
}

impl HealthMonitor {
    /// Monitor with no transports watched yet
    #[must_use]
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
            latest: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Monitor settings
    #[must_use]
    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Receive every assessment the monitor publishes
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HealthAssessment> {
        self.events.subscribe_all()
    }

    /// Run one check now, record and publish the assessment
    pub async fn check_now(&self, transport: &dyn Transport) -> HealthAssessment {
        check_and_publish(transport, &self.config, &self.latest, &self.events).await
    }

    /// Start periodic checks of `transport`; replaces an existing watch
    ///
    /// The first check runs one interval from now.
    pub fn watch(&self, transport: &Arc<dyn Transport>) {
        let kind = transport.kind();
        let weak: Weak<dyn Transport> = Arc::downgrade(transport);
        let config = self.config.clone();
        let latest = Arc::clone(&self.latest);
        let events = Arc::clone(&self.events);

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + config.interval, config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(transport) = weak.upgrade() else {
                    tracing::debug!(transport = %kind, "Transport dropped, health monitoring stopped");
                    break;
                };
                check_and_publish(transport.as_ref(), &config, &latest, &events).await;
            }
        });

        tracing::debug!(transport = %kind, interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX), "Health monitoring started");
        if let Some(previous) = self.tasks.lock().insert(kind, handle) {
            previous.abort();
        }
    }

    /// Stop checking `kind`; returns whether it was watched
    pub fn unwatch(&self, kind: TransportKind) -> bool {
        match self.tasks.lock().remove(&kind) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether `kind` has a live watch task
    #[must_use]
    pub fn is_watching(&self, kind: TransportKind) -> bool {
        self.tasks
            .lock()
            .get(&kind)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop every watch
    pub fn stop_all(&self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
    }

    /// Latest assessment per transport
    #[must_use]
    pub fn assessments(&self) -> HashMap<TransportKind, HealthAssessment> {
        self.latest.read().clone()
    }

    /// Latest assessment for one transport
    #[must_use]
    pub fn assessment(&self, kind: TransportKind) -> Option<HealthAssessment> {
        self.latest.read().get(&kind).cloned()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn check_and_publish(
    transport: &dyn Transport,
    config: &HealthMonitorConfig,
    latest: &AssessmentMap,
    events: &EventBus<HealthAssessment>,
) -> HealthAssessment {
    let result = transport.perform_health_check().await;
    let assessment = assess(transport, config);
    tracing::debug!(
        transport = %assessment.kind,
        healthy = result.healthy,
        recommendation = %assessment.recommendation,
        "Health assessed"
    );
    latest.write().insert(assessment.kind, assessment.clone());
    events.publish(assessment.clone());
    assessment
}
