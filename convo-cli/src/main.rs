//! Convo CLI - terminal front end for the realtime conversation stack.
//!
//! Follows a user's conversations live, probes the realtime endpoint and
//! manages the configuration file. Handy for debugging a deployment without
//! an app in the loop.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use convo_core::config::{AppConfig, ConfigHandle};
use convo_core::error::ConvoResult;
use convo_core::logging;
use convo_core::paths;

/// Convo - realtime conversation client.
#[derive(Parser)]
#[command(
    name = "convo",
    version,
    about = "Realtime conversation client CLI",
    long_about = "A command-line client for the realtime conversation service.\n\
                   Listens to a user's conversations over WebSocket and prints every event."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the realtime session and print conversation events.
    Listen {
        /// Realtime server URL (overrides config).
        #[arg(long)]
        host: Option<String>,
        /// JWT (overrides config).
        #[arg(long)]
        jwt: Option<String>,
    },
    /// Check that the realtime endpoint accepts a WebSocket upgrade.
    Probe {
        /// Realtime server URL (overrides config).
        #[arg(long)]
        host: Option<String>,
    },
    /// View and create the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> ConvoResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config.as_deref() {
        Some(path) => PathBuf::from(path),
        None => paths::config_file().unwrap_or_else(|_| PathBuf::from("config.toml")),
    };
    let config = AppConfig::load_or_default(&config_path)?;

    // Initialize logging
    let _guard = logging::init_logging(&config.logging, cli.verbose)?;

    let config_handle = ConfigHandle::with_path(config, config_path);

    info!(
        "Convo CLI v{} on {}",
        convo_core::constants::APP_VERSION,
        paths::os_label()
    );

    // Dispatch to command handlers
    match cli.command {
        Commands::Listen { host, jwt } => {
            commands::listen::run(config_handle, host, jwt, cli.format).await
        }
        Commands::Probe { host } => commands::probe::run(config_handle, host, cli.format).await,
        Commands::Config { action } => {
            commands::config::run(config_handle, action, cli.format).await
        }
    }
}
