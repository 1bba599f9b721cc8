// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # ctxguard
//!
//! The `ctxguard` binary runs a context-aware access-control node in front of
//! hypermedia workspaces and artifacts.
//!
//! ## Commands
//!
//! - `ctxguard serve` - Run the service stack and HTTP server
//! - `ctxguard config show|validate|generate` - Configuration management
//! - `ctxguard policy inspect` - Print the rules and shapes of a policy document
//! - `ctxguard check` - One-off access decision against a config

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use tracing::info;

use ctxguard::commands::{self, CheckArgs, ConfigCommand, PolicyCommand};

/// ctxguard - Context-aware access control for hypermedia environments
#[derive(Parser)]
#[command(name = "ctxguard")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CTXGUARD_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP listen port (default: 8080)
    #[arg(long, global = true, env = "CTXGUARD_PORT", default_value = "8080")]
    port: u16,

    /// HTTP listen host (default: 127.0.0.1)
    #[arg(long, global = true, env = "CTXGUARD_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CTXGUARD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, env = "CTXGUARD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Expose Prometheus metrics on this port
    #[arg(long, global = true, env = "CTXGUARD_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the access-control node
    #[command(name = "serve")]
    Serve,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Policy document tools
    #[command(name = "policy")]
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },

    /// Decide one request offline
    #[command(name = "check")]
    Check(CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;

    if let Some(port) = cli.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics on port {}", port);
    }

    match cli.command {
        Some(Commands::Serve) => commands::serve::run(cli.config, &cli.host, cli.port).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Policy { command }) => commands::policy::handle_command(command).await,
        Some(Commands::Check(args)) => {
            let allowed = commands::check::run(args, cli.config).await?;
            if !allowed {
                std::process::exit(1);
            }
            Ok(())
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.compact().init(),
    }

    Ok(())
}
