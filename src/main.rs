//! mcs - push notification listener
//!
//! Checks the device in, registers push tokens and keeps a persistent MCS
//! connection open, printing each notification as one JSON line.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use mcs_client::ClientConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcs")]
#[command(about = "Push notification listener for the MCS protocol")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "MCS_CONFIG")]
    config: Option<PathBuf>,

    /// Credential and persistent-id store
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// MCS host
    #[arg(long)]
    host: Option<String>,

    /// MCS port
    #[arg(long)]
    port: Option<u16>,

    // ===== TLS Options =====
    /// Connect over plain TCP (local test servers only)
    #[arg(long)]
    no_tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check the device in and print its credentials
    Checkin,

    /// Register a push token for a sender
    Register {
        /// Sender id (project number)
        sender: String,

        /// Reuse this app id instead of minting one
        #[arg(long, requires = "instance_id")]
        app_id: Option<String>,

        /// Instance id belonging to --app-id
        #[arg(long, requires = "app_id")]
        instance_id: Option<String>,

        /// Requested token lifetime in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Revoke a previously registered token
    Unregister {
        /// Sender id (project number)
        sender: String,

        #[arg(long)]
        app_id: String,

        #[arg(long)]
        instance_id: String,
    },

    /// Connect and stream notifications until Ctrl+C
    Listen {
        /// Check in before connecting even if credentials are stored
        #[arg(long)]
        checkin: bool,
    },
}

/// Builds the client configuration: defaults, file, env, then flags.
fn load_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = ClientConfig::from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok());
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => ClientConfig::load()?,
    };

    if let Some(ref host) = cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref path) = cli.store {
        config.store_path = path.clone();
    }
    if cli.no_tls {
        config.tls.enabled = false;
    }
    if let Some(ref path) = cli.ca_cert {
        config.tls.ca_cert_path = Some(path.clone());
    }
    if cli.insecure {
        config.tls.insecure = true;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Notifications go to stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = commands::execute(cli.command, config).await {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
    Ok(())
}
