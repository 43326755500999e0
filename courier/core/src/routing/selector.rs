//! Transport Selector
//!
//! Stateless scoring of transports against weighted criteria and a
//! per-request context.
//!
//! # Scoring
//!
//! ```text
//! capability  = 0.5 (+0.3 realtime wanted and supported) (+0.2 latency under ceiling)
//! latency     = max(0, 1 - average_latency / 5000ms)
//! reliability = successes / (successes + errors)
//! cost        = per-kind constant
//!
//! weighted    = Σ score · weight          (weights normalized to sum to 1)
//! final       = clamp(weighted · availability, 0, 1)
//! ```
//!
//! Availability multiplier: 0 when unavailable (open circuit or not
//! initialized), 0.3 when not connected, 0.1 when failing, 0.5 when degraded,
//! 1.0 otherwise. A transport with a zero multiplier is never selected.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::traits::Transport;
use crate::transport::types::{HealthState, Priority, TransportCapabilities, TransportKind};

/// Average latency at which the latency score reaches zero
pub const LATENCY_CEILING: Duration = Duration::from_millis(5000);

const CAPABILITY_BASELINE: f64 = 0.5;
const REALTIME_BONUS: f64 = 0.3;
const LATENCY_BONUS: f64 = 0.2;

// ============================================================================
// Criteria and Context
// ============================================================================

/// Relative importance of the scoring dimensions
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCriteria {
    /// Weight of the latency score
    pub latency_weight: f64,
    /// Weight of the reliability score
    pub reliability_weight: f64,
    /// Weight of the capability score
    pub capability_weight: f64,
    /// Weight of the cost score
    pub cost_weight: f64,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            latency_weight: 0.25,
            reliability_weight: 0.25,
            capability_weight: 0.25,
            cost_weight: 0.25,
        }
    }
}

impl SelectionCriteria {
    /// Criteria with explicit weights (normalized when scoring)
    #[must_use]
    pub fn new(latency: f64, reliability: f64, capability: f64, cost: f64) -> Self {
        Self {
            latency_weight: latency,
            reliability_weight: reliability,
            capability_weight: capability,
            cost_weight: cost,
        }
    }

    fn weights(&self) -> [f64; 4] {
        [
            self.latency_weight,
            self.reliability_weight,
            self.capability_weight,
            self.cost_weight,
        ]
    }

    /// Sum of the raw weights
    #[must_use]
    pub fn total(&self) -> f64 {
        self.weights().iter().sum()
    }

    /// Weights rescaled to sum to 1
    ///
    /// Negative or non-finite weights count as zero; if nothing is left the
    /// weights become equal.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let [lat, rel, cap, cost] = self
            .weights()
            .map(|w| if w.is_finite() && w > 0.0 { w } else { 0.0 });
        let total = lat + rel + cap + cost;
        if total <= f64::EPSILON {
            return Self::default();
        }
        Self::new(lat / total, rel / total, cap / total, cost / total)
    }

    /// Reject negative, non-finite or all-zero weights
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending weight.
    pub fn validate(&self) -> Result<(), String> {
        let names = ["latency", "reliability", "capability", "cost"];
        for (name, weight) in names.iter().zip(self.weights()) {
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!("{name} weight must be a non-negative number, got {weight}"));
            }
        }
        if self.total() <= f64::EPSILON {
            return Err("at least one selection weight must be positive".to_string());
        }
        Ok(())
    }
}

/// Per-request hints for scoring
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionContext {
    /// Type tag of the message being sent
    pub message_type: Option<String>,
    /// Urgency
    pub priority: Priority,
    /// Caller wants push delivery
    pub requires_realtime: bool,
    /// Latency the caller can tolerate
    pub max_latency: Option<Duration>,
    /// 0 on the first try
    pub retry_attempt: u32,
}

impl SelectionContext {
    /// Context for a message type
    #[must_use]
    pub fn for_message(message_type: impl Into<String>) -> Self {
        Self {
            message_type: Some(message_type.into()),
            ..Self::default()
        }
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Require realtime delivery
    #[must_use]
    pub fn realtime(mut self) -> Self {
        self.requires_realtime = true;
        self
    }

    /// Set a latency ceiling
    #[must_use]
    pub fn with_max_latency(mut self, latency: Duration) -> Self {
        self.max_latency = Some(latency);
        self
    }
}

// ============================================================================
// Score Input
// ============================================================================

/// Snapshot of everything the selector looks at for one transport
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreInput {
    /// Transport kind
    pub kind: TransportKind,
    /// Capabilities with measured metrics
    pub capabilities: TransportCapabilities,
    /// Initialized and circuit not open
    pub available: bool,
    /// Has a live channel
    pub connected: bool,
    /// Current health state
    pub health: HealthState,
}

impl ScoreInput {
    /// Snapshot a live transport
    #[must_use]
    pub fn of(transport: &dyn Transport) -> Self {
        Self {
            kind: transport.kind(),
            capabilities: transport.capabilities(),
            available: transport.is_available(),
            connected: transport.is_connected(),
            health: transport.health_status().state,
        }
    }

    /// Available, connected, healthy transport with baseline capabilities
    #[must_use]
    pub fn healthy(kind: TransportKind) -> Self {
        Self {
            kind,
            capabilities: TransportCapabilities::baseline(kind),
            available: true,
            connected: true,
            health: HealthState::Healthy,
        }
    }

    /// Override measured latency and reliability
    #[must_use]
    pub fn with_metrics(mut self, average_latency: Duration, reliability: f64) -> Self {
        self.capabilities.average_latency = average_latency;
        self.capabilities.reliability = reliability;
        self
    }

    /// Override the health state
    #[must_use]
    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = health;
        self
    }
}

/// Per-dimension scores behind a final score
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Transport kind
    pub kind: TransportKind,
    /// Capability score
    pub capability: f64,
    /// Latency score
    pub latency: f64,
    /// Reliability score
    pub reliability: f64,
    /// Cost score
    pub cost: f64,
    /// Availability multiplier
    pub multiplier: f64,
    /// Final score in `[0, 1]`
    pub total: f64,
}

// ============================================================================
// Selector
// ============================================================================

/// Ranks transports; holds nothing but the weights
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransportSelector {
    criteria: SelectionCriteria,
}

impl TransportSelector {
    /// Selector with the given weights (normalized)
    #[must_use]
    pub fn new(criteria: SelectionCriteria) -> Self {
        Self {
            criteria: criteria.normalized(),
        }
    }

    /// Normalized weights in use
    #[must_use]
    pub fn criteria(&self) -> SelectionCriteria {
        self.criteria
    }

    /// Replace the weights
    pub fn set_criteria(&mut self, criteria: SelectionCriteria) {
        self.criteria = criteria.normalized();
    }

    /// Score one transport in `[0, 1]`
    #[must_use]
    pub fn score(&self, input: &ScoreInput, context: &SelectionContext) -> f64 {
        self.breakdown(input, context).total
    }

    /// Score one transport, keeping the per-dimension values
    #[must_use]
    pub fn breakdown(&self, input: &ScoreInput, context: &SelectionContext) -> ScoreBreakdown {
        let capability = capability_score(&input.capabilities, context);
        let latency = latency_score(input.capabilities.average_latency);
        let reliability = input.capabilities.reliability.clamp(0.0, 1.0);
        let cost = cost_score(input.kind);

        let c = &self.criteria;
        let weighted = latency * c.latency_weight
            + reliability * c.reliability_weight
            + capability * c.capability_weight
            + cost * c.cost_weight;
        let multiplier = availability_multiplier(input);

        ScoreBreakdown {
            kind: input.kind,
            capability,
            latency,
            reliability,
            cost,
            multiplier,
            total: (weighted * multiplier).clamp(0.0, 1.0),
        }
    }

    /// Every candidate with its score, best first; ties keep input order
    #[must_use]
    pub fn rank(&self, candidates: &[ScoreInput], context: &SelectionContext) -> Vec<ScoreBreakdown> {
        let mut ranked: Vec<ScoreBreakdown> = candidates
            .iter()
            .map(|input| self.breakdown(input, context))
            .collect();
        ranked.sort_by(|a, b| b.total.total_cmp(&a.total));
        ranked
    }

    /// Highest-scoring available candidate; the first seen wins a tie
    #[must_use]
    pub fn select_best(
        &self,
        candidates: &[ScoreInput],
        context: &SelectionContext,
    ) -> Option<TransportKind> {
        let mut best: Option<(TransportKind, f64)> = None;
        for input in candidates.iter().filter(|input| input.available) {
            let score = self.score(input, context);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((input.kind, score));
            }
        }
        best.map(|(kind, _)| kind)
    }
}

fn capability_score(capabilities: &TransportCapabilities, context: &SelectionContext) -> f64 {
    let mut score = CAPABILITY_BASELINE;
    if context.requires_realtime && capabilities.supports_realtime {
        score += REALTIME_BONUS;
    }
    if context
        .max_latency
        .is_some_and(|ceiling| capabilities.average_latency <= ceiling)
    {
        score += LATENCY_BONUS;
    }
    score.min(1.0)
}

fn latency_score(average: Duration) -> f64 {
    (1.0 - average.as_secs_f64() / LATENCY_CEILING.as_secs_f64()).max(0.0)
}

/// Resource-cost heuristic: cheaper transports score higher
#[must_use]
pub fn cost_score(kind: TransportKind) -> f64 {
    match kind {
        TransportKind::FileExchange => 0.9,
        TransportKind::WebSocket => 0.7,
        TransportKind::Http => 0.5,
    }
}

fn availability_multiplier(input: &ScoreInput) -> f64 {
    if !input.available {
        0.0
    } else if !input.connected {
        0.3
    } else {
        match input.health {
            HealthState::Failing => 0.1,
            HealthState::Degraded => 0.5,
            HealthState::Healthy | HealthState::Disconnected => 1.0,
        }
    }
}
