//! CLI commands.
//!
//! Each subcommand is a thin adapter that:
//! 1. Applies command-line overrides to the loaded configuration
//! 2. Calls the matching pipeline service
//! 3. Logs or prints the outcome

use std::io;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::services::explorer::ExplorerClient;
use crate::services::{chunking, gambling, graph, metrics, pipeline, window};
use crate::storage::DataLayout;

/// Analyse the on-chain activity of Bitcoin gambling services.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Analyse SERVICE instead of the configured one.
    #[arg(short, long, global = true, value_name = "SERVICE")]
    pub service: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover gambling wallets, rank them and download the top ones.
    Download {
        /// Merge raw files into one document per wallet afterwards.
        #[arg(short, long)]
        merge: bool,
    },
    /// Split merged files back into numbered raw files.
    Split,
    /// Split the service's transactions into calendar chunks and write reports.
    Chunk,
    /// Export graphs and compute metrics for the large chunks of one interval.
    Process {
        /// Chunk length in months (defaults to SELECTED_INTERVAL).
        #[arg(short, long, value_name = "MONTHS")]
        interval: Option<u32>,
    },
    /// Summarise every per-chunk metrics table.
    GlobalMetrics,
    /// Rolling-window analysis of inter-bet times.
    RollingWindow {
        /// Chunk length in months (defaults to SELECTED_INTERVAL).
        #[arg(short, long, value_name = "MONTHS")]
        interval: Option<u32>,
    },
    /// Detect Martingale, d'Alembert and flat betting.
    Detect {
        /// Chunk length in months (defaults to SELECTED_INTERVAL).
        #[arg(short, long, value_name = "MONTHS")]
        interval: Option<u32>,
    },
    /// Print the service ranking as CSV.
    Rank {
        /// Also print first/last activity and peak year of each wallet.
        #[arg(short, long)]
        activity: bool,
    },
    /// Export the transaction chain of WALLET in CHUNK.
    TxGraph {
        wallet: String,
        chunk: String,
        /// Chunk length in months (defaults to SELECTED_INTERVAL).
        #[arg(short, long, value_name = "MONTHS")]
        interval: Option<u32>,
    },
    /// Run every stage from download to detection.
    All,
}

/// Run one subcommand.
///
/// # Errors
///
/// Returns the first error of the stage; per-wallet download failures are
/// logged by the stage itself and do not abort it.
pub async fn run(cli: Cli, mut config: Config) -> Result<()> {
    if let Some(service) = cli.service {
        config.service = service;
    }
    let layout = DataLayout::from_config(&config);
    tracing::info!("Service: {}", layout.service());

    match cli.command {
        Command::Download { merge } => {
            let client = ExplorerClient::new(&config)?;
            let do_merge = merge || config.do_merge;
            let ids = pipeline::run_download_pipeline(&layout, &config, &client, do_merge).await?;
            tracing::info!("Downloaded {} wallets", ids.len());
        }
        Command::Split => pipeline::run_split(&layout, &config)?,
        Command::Chunk => chunking::process_chunks(&layout, &config.intervals)?,
        Command::Process { interval } => {
            let interval = interval.unwrap_or(config.selected_interval);
            let processed = metrics::process_selected_chunks(&layout, &config, interval)?;
            tracing::info!("{} chunks processed", processed);
        }
        Command::GlobalMetrics => {
            metrics::process_chunk_global_metrics(&layout)?;
        }
        Command::RollingWindow { interval } => {
            let interval = interval.unwrap_or(config.selected_interval);
            let written = window::run_rolling_window_analysis(&layout, &config, interval)?;
            tracing::info!("{} logs written", written);
        }
        Command::Detect { interval } => {
            let interval = interval.unwrap_or(config.selected_interval);
            gambling::run_gambling_detection(&layout, &config, interval)?;
        }
        Command::Rank { activity } => {
            let (ranked, stats) = pipeline::run_ranking(&layout, &config, activity)?;
            print_csv(&ranked)?;
            if activity {
                print_csv(&stats)?;
            }
        }
        Command::TxGraph {
            wallet,
            chunk,
            interval,
        } => {
            let interval = interval.unwrap_or(config.selected_interval);
            let written = graph::build_txs_graph_for_chunk(
                &wallet,
                &chunk,
                &layout.interval_dir(interval),
                &layout.graphs(),
            )?;
            if !written {
                tracing::warn!("No transaction graph written for {} in {}", wallet, chunk);
            }
        }
        Command::All => {
            let client = ExplorerClient::new(&config)?;
            pipeline::run_all(&layout, &config, &client).await?;
        }
    }
    Ok(())
}

fn print_csv<T: serde::Serialize>(rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| PipelineError::io("<stdout>", e))
}
