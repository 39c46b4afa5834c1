//! Toolbridge - connect to MCP tool servers over stdio, WebSocket or HTTP
//!
//! Main entry point for the toolbridge CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

mod commands;

use commands::{call, health, relay, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Toolbridge - connect to MCP tool servers over stdio, WebSocket or HTTP
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file layered over the user and project configs
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Tool server: script path, command line, ws:// or http(s):// URL
    #[arg(long, global = true, value_name = "TARGET")]
    pub endpoint: Option<String>,

    /// Per-call timeout in seconds
    #[arg(long, global = true, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the WebSocket relay in front of a stdio tool server
    Relay(relay::RelayArgs),

    /// List the tools a server offers
    Tools(tools::ToolsArgs),

    /// Call one tool and print its output
    Call(call::CallArgs),

    /// Check that a relay accepts WebSocket connections
    Health(health::HealthArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = toolbridge_config::load_config(cli.config.as_deref())
        .context("failed to load configuration")?;
    let mut config = loaded.config;

    let _guard = init_tracing(cli.verbose, &config.logging);
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    tracing::debug!(sources = ?loaded.sources, "configuration loaded");

    // Flags win over every config layer
    if let Some(endpoint) = cli.endpoint {
        config.client.endpoint = Some(endpoint);
    }
    if let Some(timeout) = cli.timeout {
        config.client.timeout_secs = Some(timeout);
    }

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Relay(args) => relay::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Health(args) => health::run(args, &ctx).await,
    }
}

/// Console (human-readable, stderr) + daily JSON file.
///
/// `RUST_LOG` replaces the console filter. The file layer is skipped when
/// disabled in config or when the log directory cannot be created.
fn init_tracing(verbose: bool, logging: &toolbridge_config::LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = if verbose {
        "toolbridge=debug,toolbridge_mcp=debug,toolbridge_relay=debug,toolbridge_config=debug,info"
    } else {
        "toolbridge=info,toolbridge_mcp=info,toolbridge_relay=info,warn"
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let log_dir = logging
        .dir
        .clone()
        .or_else(toolbridge_config::default_log_dir)
        .unwrap_or_else(|| PathBuf::from("logs"));
    let appender = if logging.file_enabled() {
        daily_appender(&log_dir)
    } else {
        None
    };
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(
                    "toolbridge=trace,toolbridge_mcp=trace,toolbridge_relay=trace,toolbridge_config=trace,info",
                ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    guard
}

fn daily_appender(dir: &Path) -> Option<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("toolbridge")
        .filename_suffix("log")
        .build(dir)
        .ok()
}
