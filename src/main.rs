//! gamblewatch - Main Application Entry Point
//!
//! A data pipeline that downloads the on-chain activity of Bitcoin gambling
//! services from WalletExplorer and looks for automated betting behaviour.
//!
//! # Architecture
//!
//! - **CLI**: clap subcommands, one per pipeline stage
//! - **Network**: reqwest client for the WalletExplorer API and HTML pages
//! - **Storage**: pretty-printed JSON and CSV files under the data directory
//! - **Analysis**: petgraph graphs, rolling statistics, strategy detectors
//!
//! # Startup Flow
//!
//! 1. Initialise logging
//! 2. Parse the command line
//! 3. Load configuration from environment variables
//! 4. Run the requested stage
//! 5. Map a failure to its exit code

mod commands;
mod config;
mod error;
mod models;
mod services;
mod storage;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = commands::Cli::parse();

    let outcome = match config::Config::from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded");
            commands::run(cli, config).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!("{}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}
