//! Fallback Order
//!
//! The ordered list of transports the manager walks when the active one
//! fails, and per-failover bookkeeping of what has been tried.
//!
//! ```text
//! active (websocket) fails
//!         |
//!         v
//! candidates_excluding(websocket)
//!         |
//!         v
//! http (if available) ──► file_exchange (if available) ──► all failed
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::types::TransportKind;

/// Longest allowed order: each kind at most once
pub const MAX_FALLBACK_DEPTH: usize = TransportKind::ALL.len();

/// Errors from building a fallback order
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FallbackOrderError {
    /// No transports listed
    #[error("Fallback order is empty")]
    Empty,
    /// A kind appears twice
    #[error("Transport {kind} appears more than once in the fallback order")]
    Duplicate {
        /// Repeated kind
        kind: TransportKind,
    },
    /// More entries than transport kinds
    #[error("Fallback order depth {depth} exceeds maximum {max}")]
    TooDeep {
        /// Entries given
        depth: usize,
        /// Allowed entries
        max: usize,
    },
}

/// Validated, ordered list of transport kinds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TransportKind>", into = "Vec<TransportKind>")]
pub struct FallbackOrder {
    order: Vec<TransportKind>,
}

impl Default for FallbackOrder {
    fn default() -> Self {
        Self {
            order: TransportKind::ALL.to_vec(),
        }
    }
}

impl FallbackOrder {
    /// Build and validate an order
    ///
    /// # Errors
    ///
    /// See [`FallbackOrder::validate`].
    pub fn new(order: Vec<TransportKind>) -> Result<Self, FallbackOrderError> {
        Self::validate(&order)?;
        Ok(Self { order })
    }

    /// Check an order for emptiness, repeats and depth
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(order: &[TransportKind]) -> Result<(), FallbackOrderError> {
        if order.is_empty() {
            return Err(FallbackOrderError::Empty);
        }
        let mut seen = HashSet::new();
        for kind in order {
            if !seen.insert(*kind) {
                return Err(FallbackOrderError::Duplicate { kind: *kind });
            }
        }
        if order.len() > MAX_FALLBACK_DEPTH {
            return Err(FallbackOrderError::TooDeep {
                depth: order.len(),
                max: MAX_FALLBACK_DEPTH,
            });
        }
        Ok(())
    }

    /// Kinds in order
    #[must_use]
    pub fn kinds(&self) -> &[TransportKind] {
        &self.order
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Never true for a validated order
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether `kind` is listed
    #[must_use]
    pub fn contains(&self, kind: TransportKind) -> bool {
        self.order.contains(&kind)
    }

    /// Every listed kind except `failed`, in order
    pub fn candidates_excluding(
        &self,
        failed: TransportKind,
    ) -> impl Iterator<Item = TransportKind> + '_ {
        self.order.iter().copied().filter(move |kind| *kind != failed)
    }

    /// The entry after `current`, if any
    #[must_use]
    pub fn next_after(&self, current: TransportKind) -> Option<TransportKind> {
        let pos = self.order.iter().position(|kind| *kind == current)?;
        self.order.get(pos + 1).copied()
    }
}

impl TryFrom<Vec<TransportKind>> for FallbackOrder {
    type Error = FallbackOrderError;

    fn try_from(order: Vec<TransportKind>) -> Result<Self, Self::Error> {
        Self::new(order)
    }
}

impl From<FallbackOrder> for Vec<TransportKind> {
    fn from(order: FallbackOrder) -> Self {
        order.order
    }
}

// ============================================================================
// Fallback Context
// ============================================================================

/// Tracks the transports tried during one failover
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackContext {
    /// Transport that failed first
    pub original: TransportKind,
    /// Transports tried, in order, starting with the original
    pub tried: Vec<TransportKind>,
    /// Transport currently being tried
    pub current: TransportKind,
}

impl FallbackContext {
    /// Start from the failed transport
    #[must_use]
    pub fn new(original: TransportKind) -> Self {
        Self {
            original,
            tried: vec![original],
            current: original,
        }
    }

    /// Record a move to another transport
    pub fn fallback_to(&mut self, kind: TransportKind) {
        self.tried.push(kind);
        self.current = kind;
    }

    /// Whether `kind` has been tried already
    #[must_use]
    pub fn has_tried(&self, kind: TransportKind) -> bool {
        self.tried.contains(&kind)
    }

    /// Transports tried after the original
    #[must_use]
    pub fn fallback_count(&self) -> usize {
        self.tried.len().saturating_sub(1)
    }
}
