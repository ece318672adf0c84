// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS MCP Gateway CLI
//!
//! The `aegis-gateway` binary runs the governance daemon for Model
//! Context Protocol tool-servers and ships small configuration helpers.
//!
//! ## Commands
//!
//! - `aegis-gateway serve` - run the HTTP daemon (default command)
//! - `aegis-gateway config show|validate|generate` - configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use aegis_gateway_core::config::GatewayConfigManifest;

mod serve;

/// AEGIS MCP Gateway - register, scan, approve and enforce MCP servers
#[derive(Parser)]
#[command(name = "aegis-gateway")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AEGIS_GATEWAY_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API host
    #[arg(long, global = true, env = "AEGIS_GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// HTTP API port
    #[arg(long, global = true, env = "AEGIS_GATEWAY_PORT", default_value = "8080")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AEGIS_GATEWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway daemon
    Serve,
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print a default configuration manifest
    Generate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let manifest = GatewayConfigManifest::load_or_default(cli.config.clone())
                .context("Failed to load configuration")?;
            manifest
                .validate()
                .context("Configuration validation failed")?;
            serve::run(manifest, cli.config, &cli.host, cli.port).await
        }
        Commands::Config { command } => run_config_command(command, cli.config),
    }
}

fn run_config_command(command: ConfigCommand, path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let manifest = GatewayConfigManifest::load_or_default(path)?;
            println!("{}", serde_yaml::to_string(&manifest)?);
        }
        ConfigCommand::Validate => {
            let manifest = GatewayConfigManifest::load_or_default(path)?;
            match manifest.validate() {
                Ok(()) => println!("{}", "Configuration is valid.".green()),
                Err(e) => {
                    eprintln!("{} {}", "Configuration is invalid:".red(), e);
                    std::process::exit(1);
                }
            }
        }
        ConfigCommand::Generate => {
            let manifest = GatewayConfigManifest::default_manifest();
            println!("{}", serde_yaml::to_string(&manifest)?);
        }
    }
    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
