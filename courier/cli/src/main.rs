//! Courier CLI - Command-Line Host for the Transport Layer
//!
//! Loads configuration, builds a [`TransportManager`] over the enabled
//! transports and runs one command against it.
//!
//! # Usage
//!
//! ```bash
//! # Send one message over the best transport
//! courier send --type chat --payload '{"text":"hello"}'
//!
//! # Critical message, custom config file
//! courier --config ./courier.toml send --type alert --priority critical
//!
//! # One health check per transport, printed as JSON
//! courier probe
//!
//! # Connect and report the active transport and health map
//! courier status
//!
//! # Verbose logging
//! RUST_LOG=courier_core=debug courier status
//! ```
//!
//! # Signals
//!
//! - `SIGINT`: abandon the running command and shut the manager down

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use courier_core::config::{self, ConfigOverrides, CourierConfig};
use courier_core::{Message, Priority, SelectionContext, TransportKind, TransportManager};

/// Courier - deliver messages over the best available transport
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, env = "COURIER_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "COURIER_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// HTTP server base address
    #[arg(long, value_name = "URL", global = true)]
    http_url: Option<String>,

    /// WebSocket server address
    #[arg(long, value_name = "URL", global = true)]
    ws_url: Option<String>,

    /// Shared exchange directory
    #[arg(long, value_name = "DIR", global = true)]
    exchange_dir: Option<PathBuf>,

    /// Request timeout for every transport, in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    timeout_ms: Option<u64>,

    /// Failover order, comma separated (e.g. websocket,http,file_exchange)
    #[arg(long, value_name = "KINDS", value_delimiter = ',', global = true)]
    fallback: Option<Vec<TransportKind>>,

    /// Log selection scores and raise the default log level to debug
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message and print the response as JSON
    Send {
        /// Message type tag
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        message_type: String,

        /// JSON payload
        #[arg(short = 'p', long, default_value = "{}")]
        payload: String,

        /// Urgency (low, normal, high, critical)
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Caller-chosen message id
        #[arg(long)]
        id: Option<String>,

        /// Prefer transports that push in real time
        #[arg(long)]
        realtime: bool,
    },

    /// Run one health check per transport and print the assessments
    Probe,

    /// Connect and print the active transport and health of each transport
    Status,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.http_url {
            overrides = overrides.with_http_url(url.clone());
        }
        if let Some(ref url) = self.ws_url {
            overrides = overrides.with_ws_url(url.clone());
        }
        if let Some(ref dir) = self.exchange_dir {
            overrides = overrides.with_exchange_dir(dir.clone());
        }
        if let Some(ms) = self.timeout_ms {
            overrides = overrides.with_request_timeout_ms(ms);
        }
        if let Some(ref order) = self.fallback {
            overrides = overrides.with_fallback_order(order.clone());
        }
        if self.debug {
            overrides = overrides.with_debug(true);
        }
        overrides
    }
}

/// Load file and environment configuration, then apply CLI overrides
fn build_config(cli: &Cli) -> Result<CourierConfig> {
    let mut config = match cli.config {
        Some(ref path) => config::load_config_from_path(Some(path.clone()))
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::load_config().context("Failed to load config")?,
    };
    cli.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Filter directive for both crates; `debug` raises `info` to `debug`
fn log_directive(level: &str, debug: bool) -> String {
    let level = if debug && level.eq_ignore_ascii_case("info") {
        "debug"
    } else {
        level
    };
    format!("courier={level},courier_core={level}")
}

/// Initialize logging; `RUST_LOG` wins over the flags
fn init_logging(level: &str, debug: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_directive(level, debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{text}");
    Ok(())
}

async fn run_send(
    manager: &TransportManager,
    message_type: String,
    payload: &str,
    priority: Priority,
    id: Option<String>,
    realtime: bool,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("--payload is not valid JSON")?;
    let mut message = Message::new(message_type.clone(), payload);
    if let Some(id) = id {
        message = message.with_id(id);
    }
    let mut context = SelectionContext::for_message(message_type).with_priority(priority);
    if realtime {
        context = context.realtime();
    }

    let response = manager
        .send(message, Some(context))
        .await
        .context("Send failed")?;
    info!(
        message_id = %response.id,
        transport = ?manager.active_kind(),
        success = response.success,
        "Response received"
    );
    print_json(&response)
}

async fn run_probe(manager: &TransportManager) -> Result<()> {
    if let Err(e) = manager.initialize().await {
        warn!(error = %e, "No transport initialized; probing anyway");
    }
    let assessments = manager.check_health().await;
    print_json(&assessments)
}

async fn run_status(manager: &TransportManager, config: &CourierConfig) -> Result<()> {
    let connected = manager.connect().await;
    if let Err(ref e) = connected {
        warn!(error = %e, "No transport connected");
    }
    let status = serde_json::json!({
        "active": manager.active_kind(),
        "state": manager.state(),
        "available": manager.available_transports(),
        "health": manager.health_statuses(),
        "config_source": config.source().to_string(),
        "config_file": config.config_file_path,
    });
    print_json(&status)?;
    connected.map(|_| ()).context("Connect failed")
}

async fn run(cli: Cli, config: CourierConfig) -> Result<()> {
    let manager = Arc::new(TransportManager::from_config(&config));
    // Probe runs its own checks; the others react to connection loss
    if !matches!(cli.command, Command::Probe) {
        manager.start();
    }

    let outcome = {
        let work = async {
            match cli.command {
                Command::Send {
                    message_type,
                    payload,
                    priority,
                    id,
                    realtime,
                } => run_send(&manager, message_type, &payload, priority, id, realtime).await,
                Command::Probe => run_probe(&manager).await,
                Command::Status => run_status(&manager, &config).await,
            }
        };
        tokio::select! {
            result = work => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                Err(anyhow::anyhow!("Interrupted"))
            }
        }
    };

    if let Err(e) = manager.shutdown().await {
        warn!(error = %e, "Shutdown incomplete");
    }
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    init_logging(&cli.log_level, config.manager.debug);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.source(),
        transports = ?config.manager.enabled,
        "Courier starting"
    );

    run(cli, config).await
}
