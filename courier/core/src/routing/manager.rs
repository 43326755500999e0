//! Transport Manager
//!
//! Owns the transports, the active pointer and the fallback order; the
//! single entry point callers send through.
//!
//! # State machine
//!
//! ```text
//!                 select                      failover / optimize
//! +-----------+ --------> +--------+ ------------------------------> +-----------+
//! | NoActive  |           | Active | <------------------------------ | Switching |
//! +-----------+ <-------- +--------+        switch succeeded         +-----------+
//!       ^       disconnect                                                  |
//!       |                                                                   | chain exhausted
//!       |                 next send / connect re-runs selection      +-----------+
//!       +----------------------------------------------------------- | AllFailed |
//!                                                                    +-----------+
//! ```
//!
//! Switches and failovers run under one async mutex. A failover that
//! acquires it after another one already moved traffic off the failed
//! transport reuses the new active transport instead of switching again.
//!
//! `disconnect` stops the manager: sends it rejects in flight do not fail
//! over, and only an explicit `connect`, selection or a fresh `send` brings
//! a transport back up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::fallback::{FallbackContext, FallbackOrder, FallbackOrderError};
use super::health_monitor::{HealthAssessment, HealthMonitor, HealthMonitorConfig, Recommendation};
use super::selector::{ScoreInput, SelectionContext, SelectionCriteria, TransportSelector};
use crate::config::CourierConfig;
use crate::transport::events::{EventBus, NamedEvent, TransportEvent};
use crate::transport::factory;
use crate::transport::traits::{SendOptions, Transport, TransportError};
use crate::transport::types::{HealthStatus, Message, Priority, Response, TransportKind};

// ============================================================================
// Configuration
// ============================================================================

/// Manager settings
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerConfig {
    /// Transports to build, in registration order
    pub enabled: Vec<TransportKind>,
    /// Order walked on failover
    pub fallback_order: FallbackOrder,
    /// Selector weights
    pub criteria: SelectionCriteria,
    /// Let critical-priority sends skip an open circuit
    pub allow_critical_bypass: bool,
    /// Log score breakdowns at info level
    pub debug: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enabled: TransportKind::ALL.to_vec(),
            fallback_order: FallbackOrder::default(),
            criteria: SelectionCriteria::default(),
            allow_critical_bypass: false,
            debug: false,
        }
    }
}

impl ManagerConfig {
    /// Set the fallback order
    #[must_use]
    pub fn with_fallback_order(mut self, order: FallbackOrder) -> Self {
        self.fallback_order = order;
        self
    }

    /// Set the selector weights
    #[must_use]
    pub fn with_criteria(mut self, criteria: SelectionCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Allow or forbid the critical-priority circuit bypass
    #[must_use]
    pub fn with_critical_bypass(mut self, allow: bool) -> Self {
        self.allow_critical_bypass = allow;
        self
    }
}

// ============================================================================
// State, Events, Errors
// ============================================================================

/// Manager lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    /// Nothing selected yet
    #[default]
    NoActive,
    /// A transport carries traffic
    Active,
    /// Failover or optimization in progress
    Switching,
    /// Every fallback was exhausted
    AllFailed,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoActive => write!(f, "no_active"),
            Self::Active => write!(f, "active"),
            Self::Switching => write!(f, "switching"),
            Self::AllFailed => write!(f, "all_failed"),
        }
    }
}

/// Why the active transport changed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    /// First selection
    Initial,
    /// A better transport was found
    Optimization,
    /// The active transport failed
    Failover,
    /// The health monitor recommended avoiding the active transport
    HealthAvoid,
}

impl std::fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Optimization => write!(f, "optimization"),
            Self::Failover => write!(f, "failover"),
            Self::HealthAvoid => write!(f, "health_avoid"),
        }
    }
}

/// Events published by the manager
#[derive(Clone, Debug, PartialEq)]
pub enum ManagerEvent {
    /// A transport connected
    TransportConnected {
        /// Transport
        kind: TransportKind,
    },
    /// A transport disconnected
    TransportDisconnected {
        /// Transport
        kind: TransportKind,
        /// Why
        reason: String,
    },
    /// The active transport changed
    TransportSwitched {
        /// Previous active transport
        from: Option<TransportKind>,
        /// New active transport
        to: TransportKind,
        /// Why
        reason: SwitchReason,
    },
    /// A transport failed
    TransportFailed {
        /// Transport
        kind: TransportKind,
        /// What went wrong
        error: TransportError,
    },
    /// The health monitor assessed a transport
    HealthUpdated(HealthAssessment),
    /// Unsolicited inbound message
    Message {
        /// Transport it arrived on
        kind: TransportKind,
        /// The message
        message: Message,
    },
}

impl ManagerEvent {
    /// `transport_connected`
    pub const TRANSPORT_CONNECTED: &'static str = "transport_connected";
    /// `transport_disconnected`
    pub const TRANSPORT_DISCONNECTED: &'static str = "transport_disconnected";
    /// `transport_switched`
    pub const TRANSPORT_SWITCHED: &'static str = "transport_switched";
    /// `transport_failed`
    pub const TRANSPORT_FAILED: &'static str = "transport_failed";
    /// `health_updated`
    pub const HEALTH_UPDATED: &'static str = "health_updated";
    /// `message`
    pub const MESSAGE: &'static str = "message";
}

impl NamedEvent for ManagerEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::TransportConnected { .. } => Self::TRANSPORT_CONNECTED,
            Self::TransportDisconnected { .. } => Self::TRANSPORT_DISCONNECTED,
            Self::TransportSwitched { .. } => Self::TRANSPORT_SWITCHED,
            Self::TransportFailed { .. } => Self::TRANSPORT_FAILED,
            Self::HealthUpdated(_) => Self::HEALTH_UPDATED,
            Self::Message { .. } => Self::MESSAGE,
        }
    }
}

/// Errors surfaced by the manager
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ManagerError {
    /// No transport is available to select
    #[error("No transport available")]
    NoTransportAvailable,
    /// Failover walked the whole chain without success
    #[error("All transports failed (tried {attempted:?})")]
    AllTransportsFailed {
        /// Transports tried, starting with the one that failed
        attempted: Vec<TransportKind>,
        /// Last error seen
        last_error: Option<TransportError>,
    },
    /// Connecting the selected transport failed; the switch was rolled back
    #[error("Failed to connect {kind}: {source}")]
    ConnectFailed {
        /// Transport that did not connect
        kind: TransportKind,
        /// Connect error
        #[source]
        source: TransportError,
    },
    /// No transport of this kind is registered
    #[error("Transport {0} is not registered")]
    UnknownTransport(TransportKind),
    /// Error from a transport
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Invalid fallback order
    #[error(transparent)]
    FallbackOrder(#[from] FallbackOrderError),
}

// ============================================================================
// Manager
// ============================================================================

/// Owns the transports and drives selection and failover
pub struct TransportManager {
    config: ManagerConfig,
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
    selector: RwLock<TransportSelector>,
    active: RwLock<Option<TransportKind>>,
    state: RwLock<ManagerState>,
    switch_lock: tokio::sync::Mutex<()>,
    stopped: AtomicBool,
    monitor: HealthMonitor,
    events: EventBus<ManagerEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("state", &self.state())
            .field("active", &self.active_kind())
            .field("transports", &self.ordered_kinds())
            .finish_non_exhaustive()
    }
}

impl TransportManager {
    /// Manager over caller-built transports
    ///
    /// A second transport of an already registered kind is ignored.
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        transports: Vec<Arc<dyn Transport>>,
        monitor: HealthMonitorConfig,
    ) -> Self {
        let mut map: HashMap<TransportKind, Arc<dyn Transport>> = HashMap::new();
        for transport in transports {
            let kind = transport.kind();
            if map.contains_key(&kind) {
                tracing::warn!(transport = %kind, "Duplicate transport ignored");
                continue;
            }
            map.insert(kind, transport);
        }
        Self {
            selector: RwLock::new(TransportSelector::new(config.criteria)),
            config,
            transports: map,
            active: RwLock::new(None),
            state: RwLock::new(ManagerState::NoActive),
            switch_lock: tokio::sync::Mutex::new(()),
            stopped: AtomicBool::new(false),
            monitor: HealthMonitor::new(monitor),
            events: EventBus::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Manager with the default transports for `config.manager.enabled`
    #[must_use]
    pub fn from_config(config: &CourierConfig) -> Self {
        Self::new(
            config.manager.clone(),
            factory::create_transports(config),
            config.health.clone(),
        )
    }

    /// Manager settings
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Event registry
    #[must_use]
    pub fn events(&self) -> &EventBus<ManagerEvent> {
        &self.events
    }

    /// Health monitor
    #[must_use]
    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start health monitoring and event forwarding; idempotent
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        for transport in self.transports.values() {
            self.monitor.watch(transport);
            let rx = transport.events().subscribe_all();
            tasks.push(tokio::spawn(forward_transport_events(
                Arc::downgrade(self),
                rx,
            )));
        }
        let rx = self.monitor.subscribe();
        tasks.push(tokio::spawn(react_to_assessments(Arc::downgrade(self), rx)));
        tracing::info!(transports = self.transports.len(), "Transport manager started");
    }

    /// Initialize every transport; returns the kinds that are ready
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::AllTransportsFailed`] if none initialized.
    pub async fn initialize(&self) -> Result<Vec<TransportKind>, ManagerError> {
        let mut ready = Vec::new();
        let mut last_error = None;
        for kind in self.ordered_kinds() {
            let transport = self.get(kind)?;
            match transport.initialize().await {
                Ok(()) => ready.push(kind),
                Err(e) => {
                    tracing::warn!(transport = %kind, error = %e, "Transport unusable");
                    last_error = Some(e);
                }
            }
        }
        if ready.is_empty() {
            return Err(ManagerError::AllTransportsFailed {
                attempted: self.ordered_kinds(),
                last_error,
            });
        }
        Ok(ready)
    }

    /// Select and connect the best transport, failing over if it will not connect
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NoTransportAvailable`] or
    /// [`ManagerError::AllTransportsFailed`].
    pub async fn connect(&self) -> Result<TransportKind, ManagerError> {
        self.initialize().await?;
        self.select_or_failover(&SelectionContext::default()).await
    }

    /// Disconnect every live transport and clear the active pointer
    ///
    /// # Errors
    ///
    /// Never fails; disconnect errors are logged.
    pub async fn disconnect(&self) -> Result<(), ManagerError> {
        let _guard = self.switch_lock.lock().await;
        // Set before any transport rejects its pending sends
        self.stopped.store(true, Ordering::SeqCst);
        let active = self.active_kind();
        for kind in self.ordered_kinds() {
            let transport = self.get(kind)?;
            if transport.is_connected() || active == Some(kind) || transport.pending_count() > 0 {
                if let Err(e) = transport.disconnect().await {
                    tracing::warn!(transport = %kind, error = %e, "Disconnect failed");
                }
            }
        }
        *self.active.write() = None;
        *self.state.write() = ManagerState::NoActive;
        Ok(())
    }

    /// Disconnect, stop monitoring and stop event forwarding
    ///
    /// # Errors
    ///
    /// See [`Self::disconnect`].
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        self.disconnect().await?;
        self.monitor.stop_all();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        tracing::info!("Transport manager stopped");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Data plane
    // ------------------------------------------------------------------------

    /// Deliver a message over the active transport, failing over once
    ///
    /// Selects a transport first if none is active. On failure the fallback
    /// order is walked and the message is retried exactly once, with the
    /// same id, on the transport failover switched to.
    ///
    /// # Errors
    ///
    /// Returns the retry's error, [`ManagerError::AllTransportsFailed`] when
    /// no fallback could take over, or a selection error.
    pub async fn send(
        &self,
        message: Message,
        context: Option<SelectionContext>,
    ) -> Result<Response, ManagerError> {
        let context =
            context.unwrap_or_else(|| SelectionContext::for_message(message.message_type.clone()));
        let message = message.prepared();
        let options = self.send_options(&context);

        let kind = match self.active_kind() {
            Some(kind) => kind,
            None => self.select_or_failover(&context).await?,
        };
        let transport = self.get(kind)?;
        let error = match transport.send_with(message.clone(), options.clone()).await {
            Ok(response) => return Ok(response),
            Err(TransportError::DuplicateRequest(id)) => {
                return Err(TransportError::DuplicateRequest(id).into());
            }
            Err(e) => e,
        };
        tracing::warn!(
            transport = %kind,
            message_id = %message.id,
            error = %error,
            "Send failed, failing over"
        );

        let next = self.handle_transport_failure(kind, &error).await?;
        let retry = self.get(next)?;
        tracing::debug!(transport = %next, message_id = %message.id, "Retrying on fallback transport");
        retry.send_with(message, options).await.map_err(|e| {
            self.events.publish(ManagerEvent::TransportFailed {
                kind: next,
                error: e.clone(),
            });
            ManagerError::Transport(e)
        })
    }

    fn send_options(&self, context: &SelectionContext) -> SendOptions {
        if self.config.allow_critical_bypass && context.priority == Priority::Critical {
            SendOptions::bypassing_circuit()
        } else {
            SendOptions::default()
        }
    }

    // ------------------------------------------------------------------------
    // Selection and switching
    // ------------------------------------------------------------------------

    /// Score the available transports and switch to the best one
    ///
    /// A no-op when the best is already active and connected. If the new
    /// transport will not connect, the active pointer stays where it was.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NoTransportAvailable`] or
    /// [`ManagerError::ConnectFailed`].
    pub async fn select_optimal_transport(
        &self,
        context: Option<&SelectionContext>,
    ) -> Result<TransportKind, ManagerError> {
        let context = context.cloned().unwrap_or_default();
        let _guard = self.switch_lock.lock().await;
        self.stopped.store(false, Ordering::SeqCst);
        self.select_locked(&context, None).await
    }

    /// Re-run selection because the active transport should be avoided
    ///
    /// # Errors
    ///
    /// See [`Self::select_optimal_transport`].
    pub async fn reevaluate(&self) -> Result<TransportKind, ManagerError> {
        let _guard = self.switch_lock.lock().await;
        self.select_locked(&SelectionContext::default(), Some(SwitchReason::HealthAvoid))
            .await
    }

    /// Move traffic off `failed` along the fallback order
    ///
    /// Concurrent calls are serialized; a caller that finds traffic already
    /// moved to another available transport gets that transport back.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::AllTransportsFailed`] when no fallback could
    /// be switched to; the active pointer is cleared. Returns `error` itself,
    /// without switching, while the manager is disconnected.
    pub async fn handle_transport_failure(
        &self,
        failed: TransportKind,
        error: &TransportError,
    ) -> Result<TransportKind, ManagerError> {
        let _guard = self.switch_lock.lock().await;

        if self.is_stopped() {
            tracing::debug!(transport = %failed, error = %error, "Manager disconnected, no failover");
            return Err(ManagerError::Transport(error.clone()));
        }

        if let Some(current) = self.active_kind().filter(|kind| *kind != failed) {
            if self.get(current)?.is_available() {
                return Ok(current);
            }
        }

        tracing::warn!(transport = %failed, error = %error, "Transport failed, starting failover");
        self.events.publish(ManagerEvent::TransportFailed {
            kind: failed,
            error: error.clone(),
        });
        *self.state.write() = ManagerState::Switching;

        let mut attempts = FallbackContext::new(failed);
        let mut last_error = error.clone();
        for candidate in self.config.fallback_order.candidates_excluding(failed) {
            let Some(transport) = self.transports.get(&candidate) else {
                continue;
            };
            if !transport.is_available() {
                if let Err(e) = transport.initialize().await {
                    tracing::debug!(transport = %candidate, error = %e, "Fallback not usable");
                    continue;
                }
                if !transport.is_available() {
                    tracing::debug!(transport = %candidate, "Fallback circuit open, skipping");
                    continue;
                }
            }
            attempts.fallback_to(candidate);
            match self.switch_locked(candidate, SwitchReason::Failover).await {
                Ok(()) => {
                    tracing::info!(
                        from = %failed,
                        to = %candidate,
                        attempt = attempts.fallback_count(),
                        "Failover complete"
                    );
                    return Ok(candidate);
                }
                Err(ManagerError::ConnectFailed { source, .. }) => last_error = source,
                Err(e) => tracing::debug!(transport = %candidate, error = %e, "Fallback switch failed"),
            }
        }

        *self.active.write() = None;
        *self.state.write() = ManagerState::AllFailed;
        tracing::error!(tried = ?attempts.tried, "All transports failed");
        Err(ManagerError::AllTransportsFailed {
            attempted: attempts.tried,
            last_error: Some(last_error),
        })
    }

    async fn select_or_failover(
        &self,
        context: &SelectionContext,
    ) -> Result<TransportKind, ManagerError> {
        match self.select_optimal_transport(Some(context)).await {
            Err(ManagerError::ConnectFailed { kind, source }) => {
                self.handle_transport_failure(kind, &source).await
            }
            other => other,
        }
    }

    /// Selection with the switch lock held
    async fn select_locked(
        &self,
        context: &SelectionContext,
        reason: Option<SwitchReason>,
    ) -> Result<TransportKind, ManagerError> {
        let mut candidates = Vec::new();
        for kind in self.ordered_kinds() {
            let transport = self.get(kind)?;
            if !transport.is_available() {
                // No-op for initialized transports; picks up late environment recovery
                if let Err(e) = transport.initialize().await {
                    tracing::debug!(transport = %kind, error = %e, "Transport not initialized");
                }
            }
            if transport.is_available() {
                candidates.push(ScoreInput::of(transport.as_ref()));
            }
        }

        let selector = self.selector.read().clone();
        if self.config.debug {
            tracing::info!(scores = ?selector.rank(&candidates, context), "Transport scores");
        }
        let best = selector
            .select_best(&candidates, context)
            .ok_or(ManagerError::NoTransportAvailable)?;

        let current = self.active_kind();
        if current == Some(best) && self.get(best)?.is_connected() {
            return Ok(best);
        }
        let reason = reason.unwrap_or(if current.is_none() {
            SwitchReason::Initial
        } else {
            SwitchReason::Optimization
        });
        self.switch_locked(best, reason).await?;
        Ok(best)
    }

    /// Connect `target`, make it active, retire the previous transport
    async fn switch_locked(
        &self,
        target: TransportKind,
        reason: SwitchReason,
    ) -> Result<(), ManagerError> {
        let transport = self.get(target)?;
        let previous = self.active_kind();
        let prior_state = self.state();
        *self.state.write() = ManagerState::Switching;

        if !transport.is_connected() {
            if let Err(source) = transport.connect().await {
                *self.state.write() = prior_state;
                tracing::warn!(transport = %target, error = %source, "Switch rolled back");
                return Err(ManagerError::ConnectFailed {
                    kind: target,
                    source,
                });
            }
        }

        *self.active.write() = Some(target);
        *self.state.write() = ManagerState::Active;
        tracing::info!(from = ?previous, to = %target, reason = %reason, "Transport switched");
        self.events.publish(ManagerEvent::TransportSwitched {
            from: previous,
            to: target,
            reason,
        });

        if let Some(old) = previous.filter(|kind| *kind != target) {
            self.retire(old);
        }
        Ok(())
    }

    /// Disconnect a transport in the background; failures are only logged
    fn retire(&self, kind: TransportKind) {
        let Some(transport) = self.transports.get(&kind).cloned() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = transport.disconnect().await {
                tracing::warn!(transport = %kind, error = %e, "Retired transport failed to disconnect");
            }
        });
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Whether `disconnect` stopped the manager and nothing restarted it
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    /// Kind of the active transport
    #[must_use]
    pub fn active_kind(&self) -> Option<TransportKind> {
        *self.active.read()
    }

    /// The active transport
    #[must_use]
    pub fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        self.active_kind().and_then(|kind| self.transport(kind))
    }

    /// Registered transport of `kind`
    #[must_use]
    pub fn transport(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.transports.get(&kind).cloned()
    }

    /// Available transports, fallback order first
    #[must_use]
    pub fn available_transports(&self) -> Vec<TransportKind> {
        self.ordered_kinds()
            .into_iter()
            .filter(|kind| self.transports.get(kind).is_some_and(|t| t.is_available()))
            .collect()
    }

    /// Health snapshot of every transport
    #[must_use]
    pub fn health_statuses(&self) -> HashMap<TransportKind, HealthStatus> {
        self.transports
            .iter()
            .map(|(kind, transport)| (*kind, transport.health_status()))
            .collect()
    }

    /// Latest health assessment of every monitored transport
    #[must_use]
    pub fn assessments(&self) -> HashMap<TransportKind, HealthAssessment> {
        self.monitor.assessments()
    }

    /// Run one health check per transport now
    pub async fn check_health(&self) -> Vec<HealthAssessment> {
        let mut results = Vec::new();
        for kind in self.ordered_kinds() {
            if let Some(transport) = self.transports.get(&kind) {
                results.push(self.monitor.check_now(transport.as_ref()).await);
            }
        }
        results
    }

    /// Replace the selector weights
    pub fn set_criteria(&self, criteria: SelectionCriteria) {
        self.selector.write().set_criteria(criteria);
    }

    /// Normalized selector weights in use
    #[must_use]
    pub fn criteria(&self) -> SelectionCriteria {
        self.selector.read().criteria()
    }

    fn get(&self, kind: TransportKind) -> Result<Arc<dyn Transport>, ManagerError> {
        self.transport(kind)
            .ok_or(ManagerError::UnknownTransport(kind))
    }

    /// Registered kinds: fallback order first, the rest after
    fn ordered_kinds(&self) -> Vec<TransportKind> {
        let mut kinds: Vec<TransportKind> = self
            .config
            .fallback_order
            .kinds()
            .iter()
            .copied()
            .filter(|kind| self.transports.contains_key(kind))
            .collect();
        for kind in TransportKind::ALL {
            if self.transports.contains_key(&kind) && !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }

    // ------------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------------

    async fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { kind } => {
                self.events.publish(ManagerEvent::TransportConnected { kind });
            }
            TransportEvent::Disconnected { kind, reason } => {
                self.events
                    .publish(ManagerEvent::TransportDisconnected { kind, reason });
            }
            TransportEvent::MessageReceived { kind, message } => {
                self.events.publish(ManagerEvent::Message { kind, message });
            }
            TransportEvent::Error { kind, error } => {
                let active_lost = self.active_kind() == Some(kind)
                    && self.transports.get(&kind).is_some_and(|t| !t.is_connected());
                if active_lost {
                    if let Err(e) = self.handle_transport_failure(kind, &error).await {
                        tracing::error!(transport = %kind, error = %e, "Failover after connection loss failed");
                    }
                } else {
                    self.events
                        .publish(ManagerEvent::TransportFailed { kind, error });
                }
            }
            TransportEvent::Reconnecting { kind, attempt, .. } => {
                tracing::debug!(transport = %kind, attempt, "Transport reconnecting");
            }
            TransportEvent::HealthCheckResult(_) => {}
        }
    }

    async fn on_assessment(&self, assessment: HealthAssessment) {
        let kind = assessment.kind;
        let avoid = assessment.recommendation == Recommendation::Avoid;
        self.events.publish(ManagerEvent::HealthUpdated(assessment));

        if avoid && self.active_kind() == Some(kind) {
            tracing::info!(transport = %kind, "Active transport should be avoided, re-selecting");
            match self.reevaluate().await {
                Ok(selected) if selected != kind => {}
                Ok(_) => tracing::debug!(transport = %kind, "No better transport, staying"),
                Err(e) => tracing::warn!(error = %e, "Re-selection failed"),
            }
        }
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

async fn forward_transport_events(
    manager: Weak<TransportManager>,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.on_transport_event(event).await;
    }
}

async fn react_to_assessments(
    manager: Weak<TransportManager>,
    mut rx: mpsc::UnboundedReceiver<HealthAssessment>,
) {
    while let Some(assessment) = rx.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.on_assessment(assessment).await;
    }
}
