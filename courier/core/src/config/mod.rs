//! TOML Configuration File Support
//!
//! Centralized configuration loading for courier, from an optional TOML file
//! at `~/.config/courier/courier.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied in this order, highest priority first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`COURIER_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! Configuration is only ever read. Nothing in this crate writes it back.
//!
//! # Example Configuration
//!
//! ```toml
//! [manager]
//! enabled = ["websocket", "http", "file_exchange"]
//! fallback_order = ["websocket", "http", "file_exchange"]
//! allow_critical_bypass = false
//! debug = false
//!
//! [selection]
//! latency_weight = 0.4
//! reliability_weight = 0.3
//! capability_weight = 0.2
//! cost_weight = 0.1
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 30000
//!
//! [http]
//! base_url = "http://localhost:8000"
//! request_timeout_ms = 30000
//! pool_size = 6
//!
//! [websocket]
//! url = "ws://localhost:8000/ws"
//! reconnect_max_attempts = 5
//! heartbeat_interval_ms = 30000
//!
//! [file_exchange]
//! exchange_dir = "/var/lib/courier/exchange"
//! poll_interval_ms = 100
//! lock_timeout_ms = 5000
//!
//! [health]
//! interval_ms = 30000
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::fallback::FallbackOrder;
use crate::routing::health_monitor::HealthMonitorConfig;
use crate::routing::manager::ManagerConfig;
use crate::transport::circuit_breaker::CircuitBreakerConfig;
use crate::transport::file_exchange::FileExchangeConfig;
use crate::transport::http::HttpConfig;
use crate::transport::types::TransportKind;
use crate::transport::websocket::WebSocketConfig;

/// Environment variable overriding the HTTP base address
pub const ENV_HTTP_URL: &str = "COURIER_HTTP_URL";
/// Environment variable overriding the WebSocket address
pub const ENV_WS_URL: &str = "COURIER_WS_URL";
/// Environment variable overriding the exchange directory
pub const ENV_EXCHANGE_DIR: &str = "COURIER_EXCHANGE_DIR";
/// Environment variable overriding every transport's request timeout
pub const ENV_REQUEST_TIMEOUT_MS: &str = "COURIER_REQUEST_TIMEOUT_MS";
/// Environment variable overriding the fallback order (comma separated)
pub const ENV_FALLBACK_ORDER: &str = "COURIER_FALLBACK_ORDER";
/// Environment variable enabling debug output
pub const ENV_DEBUG: &str = "COURIER_DEBUG";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[manager]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerToml {
    /// Transports to build
    pub enabled: Option<Vec<String>>,

    /// Failover order
    pub fallback_order: Option<Vec<String>>,

    /// Let critical-priority sends skip an open circuit
    pub allow_critical_bypass: Option<bool>,

    /// Verbose selection logging
    pub debug: Option<bool>,
}

/// `[selection]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionToml {
    /// Weight of the latency score
    pub latency_weight: Option<f64>,

    /// Weight of the reliability score
    pub reliability_weight: Option<f64>,

    /// Weight of the capability score
    pub capability_weight: Option<f64>,

    /// Weight of the cost score
    pub cost_weight: Option<f64>,
}

/// `[circuit_breaker]` section, shared by every transport
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerToml {
    /// Consecutive failures that open the circuit
    pub failure_threshold: Option<u32>,

    /// Open duration before a trial call, in milliseconds
    pub reset_timeout_ms: Option<u64>,
}

/// `[http]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpToml {
    /// Server base address
    pub base_url: Option<String>,

    /// Path messages are posted to
    pub message_path: Option<String>,

    /// Liveness path
    pub health_path: Option<String>,

    /// Event stream path; an empty string disables the stream
    pub events_path: Option<String>,

    /// Per-request deadline in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Liveness probe timeout in milliseconds
    pub health_timeout_ms: Option<u64>,

    /// Concurrent requests on the wire
    pub pool_size: Option<usize>,

    /// Pause before reopening the event stream, in milliseconds
    pub event_retry_delay_ms: Option<u64>,
}

/// `[websocket]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketToml {
    /// Server address
    pub url: Option<String>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Per-request deadline in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Health-check pong deadline in milliseconds
    pub ping_timeout_ms: Option<u64>,

    /// First reconnect delay in milliseconds
    pub reconnect_base_delay_ms: Option<u64>,

    /// Reconnect delay cap in milliseconds
    pub reconnect_max_delay_ms: Option<u64>,

    /// Reconnect attempts before giving up
    pub reconnect_max_attempts: Option<u32>,

    /// Whether to send periodic pings
    pub heartbeat_enabled: Option<bool>,

    /// Ping interval in milliseconds
    pub heartbeat_interval_ms: Option<u64>,

    /// Pong deadline for heartbeat pings in milliseconds
    pub heartbeat_timeout_ms: Option<u64>,
}

/// `[file_exchange]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileExchangeToml {
    /// Shared exchange directory
    pub exchange_dir: Option<PathBuf>,

    /// Response polling interval in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Write-lock wait bound in milliseconds
    pub lock_timeout_ms: Option<u64>,

    /// Per-request deadline in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Whether to poll the events directory
    pub watch_events: Option<bool>,
}

/// `[health]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Check interval in milliseconds
    pub interval_ms: Option<u64>,

    /// Consecutive failures above which a transport is avoided
    pub avoid_after_failures: Option<u32>,

    /// Latency below which a healthy transport is preferred, in milliseconds
    pub prefer_latency_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierToml {
    /// Manager section
    pub manager: ManagerToml,

    /// Selection weights section
    pub selection: SelectionToml,

    /// Circuit breaker section
    pub circuit_breaker: CircuitBreakerToml,

    /// HTTP transport section
    pub http: HttpToml,

    /// WebSocket transport section
    pub websocket: WebSocketToml,

    /// File-exchange transport section
    pub file_exchange: FileExchangeToml,

    /// Health monitor section
    pub health: HealthToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Every typed runtime config in one place
///
/// Use [`load_config`] to build one with proper priority handling, or
/// [`CourierConfig::default`] for pure defaults.
#[derive(Clone, Debug)]
pub struct CourierConfig {
    /// Manager settings
    pub manager: ManagerConfig,

    /// Breaker thresholds copied into each transport config
    pub circuit_breaker: CircuitBreakerConfig,

    /// HTTP transport settings
    pub http: HttpConfig,

    /// WebSocket transport settings
    pub websocket: WebSocketConfig,

    /// File-exchange transport settings
    pub file_exchange: FileExchangeConfig,

    /// Health monitor settings
    pub health: HealthMonitorConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            http: HttpConfig::default(),
            websocket: WebSocketConfig::default(),
            file_exchange: FileExchangeConfig::default(),
            health: HealthMonitorConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl CourierConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timings everywhere
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::for_testing(),
            http: HttpConfig::for_testing(),
            websocket: WebSocketConfig::for_testing(),
            file_exchange: FileExchangeConfig::for_testing(),
            health: HealthMonitorConfig::for_testing(),
            ..Self::default()
        }
    }

    /// Primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Replace the breaker thresholds of every transport
    pub fn set_circuit_breaker(&mut self, breaker: CircuitBreakerConfig) {
        self.http.circuit_breaker = breaker.clone();
        self.websocket.circuit_breaker = breaker.clone();
        self.file_exchange.circuit_breaker = breaker.clone();
        self.circuit_breaker = breaker;
    }

    /// Set the request timeout of every transport
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.http.request_timeout = timeout;
        self.websocket.request_timeout = timeout;
        self.file_exchange.request_timeout = timeout;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.manager
            .criteria
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("selection: {e}")))?;
        FallbackOrder::validate(self.manager.fallback_order.kinds())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if self.manager.enabled.is_empty() {
            return Err(ConfigError::ValidationError(
                "manager.enabled must list at least one transport".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.http.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "http.pool_size must be at least 1".to_string(),
            ));
        }
        if self.file_exchange.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "file_exchange.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.health.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "health.interval_ms must be positive".to_string(),
            ));
        }
        if self.websocket.heartbeat.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "websocket.heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/courier/courier.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("courier").join("courier.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<CourierConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// the merged configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<CourierConfig, ConfigError> {
    let mut config = CourierConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: CourierToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Parse a list of transport names
fn parse_kinds<S: AsRef<str>>(names: &[S]) -> Result<Vec<TransportKind>, String> {
    names
        .iter()
        .map(|name| TransportKind::from_str(name.as_ref()))
        .collect()
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut CourierConfig, toml: &CourierToml) -> Result<(), ConfigError> {
    // Manager
    if let Some(ref names) = toml.manager.enabled {
        config.manager.enabled = parse_kinds(names.as_slice())
            .map_err(|e| ConfigError::ValidationError(format!("manager.enabled: {e}")))?;
    }
    if let Some(ref names) = toml.manager.fallback_order {
        let kinds = parse_kinds(names.as_slice())
            .map_err(|e| ConfigError::ValidationError(format!("manager.fallback_order: {e}")))?;
        config.manager.fallback_order = FallbackOrder::new(kinds)
            .map_err(|e| ConfigError::ValidationError(format!("manager.fallback_order: {e}")))?;
    }
    if let Some(allow) = toml.manager.allow_critical_bypass {
        config.manager.allow_critical_bypass = allow;
    }
    if let Some(debug) = toml.manager.debug {
        config.manager.debug = debug;
    }

    // Selection weights
    let criteria = &mut config.manager.criteria;
    if let Some(weight) = toml.selection.latency_weight {
        criteria.latency_weight = weight;
    }
    if let Some(weight) = toml.selection.reliability_weight {
        criteria.reliability_weight = weight;
    }
    if let Some(weight) = toml.selection.capability_weight {
        criteria.capability_weight = weight;
    }
    if let Some(weight) = toml.selection.cost_weight {
        criteria.cost_weight = weight;
    }

    // Circuit breaker, shared by all transports
    let mut breaker = config.circuit_breaker.clone();
    if let Some(threshold) = toml.circuit_breaker.failure_threshold {
        breaker.failure_threshold = threshold;
    }
    if let Some(timeout) = toml.circuit_breaker.reset_timeout_ms {
        breaker.reset_timeout = ms(timeout);
    }
    config.set_circuit_breaker(breaker);

    // HTTP
    let http = &mut config.http;
    if let Some(ref url) = toml.http.base_url {
        http.base_url = url.clone();
    }
    if let Some(ref path) = toml.http.message_path {
        http.message_path = path.clone();
    }
    if let Some(ref path) = toml.http.health_path {
        http.health_path = path.clone();
    }
    if let Some(ref path) = toml.http.events_path {
        http.events_path = (!path.is_empty()).then(|| path.clone());
    }
    if let Some(timeout) = toml.http.request_timeout_ms {
        http.request_timeout = ms(timeout);
    }
    if let Some(timeout) = toml.http.connect_timeout_ms {
        http.connect_timeout = ms(timeout);
    }
    if let Some(timeout) = toml.http.health_timeout_ms {
        http.health_timeout = ms(timeout);
    }
    if let Some(size) = toml.http.pool_size {
        http.pool_size = size;
    }
    if let Some(delay) = toml.http.event_retry_delay_ms {
        http.event_retry_delay = ms(delay);
    }

    // WebSocket
    let ws = &mut config.websocket;
    if let Some(ref url) = toml.websocket.url {
        ws.url = url.clone();
    }
    if let Some(timeout) = toml.websocket.connect_timeout_ms {
        ws.connect_timeout = ms(timeout);
    }
    if let Some(timeout) = toml.websocket.request_timeout_ms {
        ws.request_timeout = ms(timeout);
    }
    if let Some(timeout) = toml.websocket.ping_timeout_ms {
        ws.ping_timeout = ms(timeout);
    }
    if let Some(delay) = toml.websocket.reconnect_base_delay_ms {
        ws.reconnect.base_delay = ms(delay);
    }
    if let Some(delay) = toml.websocket.reconnect_max_delay_ms {
        ws.reconnect.max_delay = ms(delay);
    }
    if let Some(attempts) = toml.websocket.reconnect_max_attempts {
        ws.reconnect.max_attempts = attempts;
    }
    if let Some(enabled) = toml.websocket.heartbeat_enabled {
        ws.heartbeat.enabled = enabled;
    }
    if let Some(interval) = toml.websocket.heartbeat_interval_ms {
        ws.heartbeat.interval = ms(interval);
    }
    if let Some(timeout) = toml.websocket.heartbeat_timeout_ms {
        ws.heartbeat.response_timeout = ms(timeout);
    }

    // File exchange
    let fe = &mut config.file_exchange;
    if let Some(ref dir) = toml.file_exchange.exchange_dir {
        fe.exchange_dir = dir.clone();
    }
    if let Some(interval) = toml.file_exchange.poll_interval_ms {
        fe.poll_interval = ms(interval);
    }
    if let Some(timeout) = toml.file_exchange.lock_timeout_ms {
        fe.lock_timeout = ms(timeout);
    }
    if let Some(timeout) = toml.file_exchange.request_timeout_ms {
        fe.request_timeout = ms(timeout);
    }
    if let Some(watch) = toml.file_exchange.watch_events {
        fe.watch_events = watch;
    }

    // Health monitor
    if let Some(interval) = toml.health.interval_ms {
        config.health.interval = ms(interval);
    }
    if let Some(failures) = toml.health.avoid_after_failures {
        config.health.avoid_after_failures = failures;
    }
    if let Some(latency) = toml.health.prefer_latency_ms {
        config.health.prefer_latency = ms(latency);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut CourierConfig) {
    apply_env_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides from any key lookup; unparsable values are logged and skipped
fn apply_env_from<F>(config: &mut CourierConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_HTTP_URL) {
        config.http.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(url) = lookup(ENV_WS_URL) {
        config.websocket.url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = lookup(ENV_EXCHANGE_DIR) {
        config.file_exchange.exchange_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = lookup(ENV_REQUEST_TIMEOUT_MS) {
        match timeout.parse::<u64>() {
            Ok(value) => {
                config.set_request_timeout(ms(value));
                config.source = ConfigSource::Env;
            }
            Err(e) => {
                tracing::warn!(
                    var = ENV_REQUEST_TIMEOUT_MS,
                    value = %timeout,
                    error = %e,
                    "Ignoring invalid value"
                );
            }
        }
    }
    if let Some(order) = lookup(ENV_FALLBACK_ORDER) {
        let names: Vec<&str> = order.split(',').filter(|s| !s.trim().is_empty()).collect();
        let parsed = parse_kinds(names.as_slice())
            .and_then(|kinds| FallbackOrder::new(kinds).map_err(|e| e.to_string()));
        match parsed {
            Ok(order) => {
                config.manager.fallback_order = order;
                config.source = ConfigSource::Env;
            }
            Err(e) => {
                tracing::warn!(
                    var = ENV_FALLBACK_ORDER,
                    value = %order,
                    error = %e,
                    "Ignoring invalid value"
                );
            }
        }
    }
    if let Some(debug) = lookup(ENV_DEBUG) {
        config.manager.debug = debug != "0" && !debug.eq_ignore_ascii_case("false");
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// HTTP base address override
    pub http_url: Option<String>,

    /// WebSocket address override
    pub ws_url: Option<String>,

    /// Exchange directory override
    pub exchange_dir: Option<PathBuf>,

    /// Request timeout override for every transport (milliseconds)
    pub request_timeout_ms: Option<u64>,

    /// Fallback order override
    pub fallback_order: Option<Vec<TransportKind>>,

    /// Debug flag override
    pub debug: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set HTTP base address override
    #[must_use]
    pub fn with_http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = Some(url.into());
        self
    }

    /// Set WebSocket address override
    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Set exchange directory override
    #[must_use]
    pub fn with_exchange_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exchange_dir = Some(dir.into());
        self
    }

    /// Set request timeout override
    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// Set fallback order override
    #[must_use]
    pub fn with_fallback_order(mut self, order: Vec<TransportKind>) -> Self {
        self.fallback_order = Some(order);
        self
    }

    /// Set debug override
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    fn is_empty(&self) -> bool {
        self.http_url.is_none()
            && self.ws_url.is_none()
            && self.exchange_dir.is_none()
            && self.request_timeout_ms.is_none()
            && self.fallback_order.is_none()
            && self.debug.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an invalid fallback order.
    pub fn apply(&self, config: &mut CourierConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }

        if let Some(ref order) = self.fallback_order {
            config.manager.fallback_order = FallbackOrder::new(order.clone())
                .map_err(|e| ConfigError::ValidationError(format!("fallback order: {e}")))?;
        }
        if let Some(ref url) = self.http_url {
            config.http.base_url = url.clone();
        }
        if let Some(ref url) = self.ws_url {
            config.websocket.url = url.clone();
        }
        if let Some(ref dir) = self.exchange_dir {
            config.file_exchange.exchange_dir = dir.clone();
        }
        if let Some(timeout) = self.request_timeout_ms {
            config.set_request_timeout(ms(timeout));
        }
        if let Some(debug) = self.debug {
            config.manager.debug = debug;
        }

        config.source = ConfigSource::Cli;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn parse(content: &str) -> Result<CourierConfig, ConfigError> {
        let toml: CourierToml = toml::from_str(content)?;
        let mut config = CourierConfig::default();
        apply_toml_config(&mut config, &toml)?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = CourierConfig::default();

        assert_eq!(config.manager.enabled, TransportKind::ALL.to_vec());
        assert_eq!(config.manager.fallback_order, FallbackOrder::default());
        assert!(!config.manager.allow_critical_bypass);
        assert_eq!(config.health.interval, Duration::from_secs(30));
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("courier/courier.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let config = parse(
            r#"
[manager]
enabled = ["http", "file_exchange"]
fallback_order = ["http", "file_exchange"]
allow_critical_bypass = true
debug = true

[selection]
latency_weight = 0.4
reliability_weight = 0.3
capability_weight = 0.2
cost_weight = 0.1

[circuit_breaker]
failure_threshold = 2
reset_timeout_ms = 1500

[http]
base_url = "http://example.test:9000"
events_path = ""
request_timeout_ms = 2500
pool_size = 3

[websocket]
url = "ws://example.test:9000/ws"
reconnect_max_attempts = 7
heartbeat_enabled = false

[file_exchange]
exchange_dir = "/tmp/courier-x"
poll_interval_ms = 25
lock_timeout_ms = 400

[health]
interval_ms = 5000
avoid_after_failures = 4
"#,
        )
        .unwrap();

        assert_eq!(
            config.manager.enabled,
            vec![TransportKind::Http, TransportKind::FileExchange]
        );
        assert_eq!(
            config.manager.fallback_order.kinds(),
            &[TransportKind::Http, TransportKind::FileExchange]
        );
        assert!(config.manager.allow_critical_bypass);
        assert!(config.manager.debug);
        assert_eq!(
            config.manager.criteria,
            crate::routing::selector::SelectionCriteria::new(0.4, 0.3, 0.2, 0.1)
        );

        assert_eq!(config.http.base_url, "http://example.test:9000");
        assert_eq!(config.http.events_path, None);
        assert_eq!(config.http.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.http.pool_size, 3);

        assert_eq!(config.websocket.url, "ws://example.test:9000/ws");
        assert_eq!(config.websocket.reconnect.max_attempts, 7);
        assert!(!config.websocket.heartbeat.enabled);

        assert_eq!(config.file_exchange.exchange_dir, PathBuf::from("/tmp/courier-x"));
        assert_eq!(config.file_exchange.poll_interval, Duration::from_millis(25));
        assert_eq!(config.file_exchange.lock_timeout, Duration::from_millis(400));

        assert_eq!(config.health.interval, Duration::from_secs(5));
        assert_eq!(config.health.avoid_after_failures, 4);
    }

    #[test]
    fn test_circuit_breaker_section_reaches_every_transport() {
        let config = parse("[circuit_breaker]\nfailure_threshold = 9\n").unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 9);
        assert_eq!(config.http.circuit_breaker.failure_threshold, 9);
        assert_eq!(config.websocket.circuit_breaker.failure_threshold, 9);
        assert_eq!(config.file_exchange.circuit_breaker.failure_threshold, 9);
        assert_eq!(
            config.http.circuit_breaker.reset_timeout,
            CircuitBreakerConfig::default().reset_timeout
        );
    }

    #[test]
    fn test_parse_empty_toml() {
        let config = parse("").unwrap();
        assert_eq!(config.http, HttpConfig::default());
        assert_eq!(config.manager, ManagerConfig::default());
    }

    #[test]
    fn test_transport_name_aliases() {
        let config = parse("[manager]\nfallback_order = [\"ws\", \"file\"]\n").unwrap();
        assert_eq!(
            config.manager.fallback_order.kinds(),
            &[TransportKind::WebSocket, TransportKind::FileExchange]
        );
    }

    #[test]
    fn test_invalid_fallback_order_rejected() {
        let dup = parse("[manager]\nfallback_order = [\"http\", \"http\"]\n");
        assert!(matches!(dup, Err(ConfigError::ValidationError(_))));

        let empty = parse("[manager]\nfallback_order = []\n");
        assert!(matches!(empty, Err(ConfigError::ValidationError(_))));

        let unknown = parse("[manager]\nfallback_order = [\"carrier-pigeon\"]\n");
        assert!(matches!(unknown, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[selection]\nlatency_weight = -1.0\n",
            "[selection]\nlatency_weight = 0.0\nreliability_weight = 0.0\ncapability_weight = 0.0\ncost_weight = 0.0\n",
            "[http]\npool_size = 0\n",
            "[file_exchange]\npoll_interval_ms = 0\n",
            "[circuit_breaker]\nfailure_threshold = 0\n",
            "[manager]\nenabled = []\n",
            "[websocket]\nheartbeat_interval_ms = 0\n",
            "[websocket]\nheartbeat_enabled = false\nheartbeat_interval_ms = 0\n",
        ];
        for case in cases {
            let result = parse(case);
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "expected validation error for {case:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[http\nbase_url = ");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_from_file_records_path() {
        let file = write_toml("[health]\ninterval_ms = 1234\n");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.health.interval, Duration::from_millis(1234));
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_file_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(Some(dir.path().join("absent.toml"))).unwrap();
        assert!(config.config_file_path.is_none());
    }

    // =========================================================================
    // Environment
    // =========================================================================

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = parse("[http]\nbase_url = \"http://from-file\"\n").unwrap();
        apply_env_from(
            &mut config,
            env(&[
                (ENV_HTTP_URL, "http://from-env"),
                (ENV_WS_URL, "ws://from-env/ws"),
                (ENV_EXCHANGE_DIR, "/tmp/env-exchange"),
                (ENV_REQUEST_TIMEOUT_MS, "750"),
                (ENV_FALLBACK_ORDER, "http, websocket"),
                (ENV_DEBUG, "1"),
            ]),
        );

        assert_eq!(config.http.base_url, "http://from-env");
        assert_eq!(config.websocket.url, "ws://from-env/ws");
        assert_eq!(config.file_exchange.exchange_dir, PathBuf::from("/tmp/env-exchange"));
        assert_eq!(config.http.request_timeout, Duration::from_millis(750));
        assert_eq!(config.websocket.request_timeout, Duration::from_millis(750));
        assert_eq!(config.file_exchange.request_timeout, Duration::from_millis(750));
        assert_eq!(
            config.manager.fallback_order.kinds(),
            &[TransportKind::Http, TransportKind::WebSocket]
        );
        assert!(config.manager.debug);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let mut config = CourierConfig::default();
        apply_env_from(
            &mut config,
            env(&[
                (ENV_REQUEST_TIMEOUT_MS, "soon"),
                (ENV_FALLBACK_ORDER, "http,http"),
                (ENV_DEBUG, "false"),
            ]),
        );

        assert_eq!(config.http.request_timeout, HttpConfig::default().request_timeout);
        assert_eq!(config.manager.fallback_order, FallbackOrder::default());
        assert!(!config.manager.debug);
    }

    // =========================================================================
    // CLI Overrides
    // =========================================================================

    #[test]
    fn test_cli_overrides_env() {
        let mut config = CourierConfig::default();
        apply_env_from(&mut config, env(&[(ENV_HTTP_URL, "http://from-env")]));

        ConfigOverrides::new()
            .with_http_url("http://from-cli")
            .with_fallback_order(vec![TransportKind::FileExchange])
            .with_debug(true)
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.http.base_url, "http://from-cli");
        assert_eq!(config.manager.fallback_order.kinds(), &[TransportKind::FileExchange]);
        assert!(config.manager.debug);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_empty_overrides_no_change() {
        let mut config = CourierConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.http, HttpConfig::default());
    }

    #[test]
    fn test_override_with_invalid_order_fails() {
        let mut config = CourierConfig::default();
        let result = ConfigOverrides::new()
            .with_fallback_order(vec![TransportKind::Http, TransportKind::Http])
            .apply(&mut config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
        assert_eq!(config.manager.fallback_order, FallbackOrder::default());
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
