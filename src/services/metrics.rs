//! Per-chunk wallet metrics and their per-chunk summaries.

use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::report::{ChunkCount, GlobalMetrics, WalletMetrics};
use crate::models::transaction::{TxKind, WalletTx};
use crate::services::chunking::{load_transaction_file, timestamp_to_utc};
use crate::services::{graph, stats};
use crate::storage::{self, DataLayout, METRICS_SUFFIX};

/// Wallets with this many bets or fewer are left out of the metrics table.
pub const MIN_IN_DEGREE: u64 = 10;

/// Time statistics of a wallet's activity, in seconds between consecutive transactions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeStats {
    pub variance: Option<f64>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Degrees {
    in_degree: u64,
    out_degree: u64,
    received: f64,
    sent: f64,
}

/// Count each counterparty's payments to and from the service.
///
/// Rows are sorted by `out_degree` descending; ties keep first-seen order.
/// Derived columns are filled in by [`build_wallet_metrics`].
pub fn count_wallet_degrees(transactions: &[WalletTx]) -> Vec<WalletMetrics> {
    let mut order: Vec<&str> = Vec::new();
    let mut degrees: HashMap<&str, Degrees> = HashMap::new();

    for tx in transactions {
        let Some(cp) = tx.counterparty() else { continue };
        let entry = degrees.entry(cp.wallet_id).or_insert_with(|| {
            order.push(cp.wallet_id);
            Degrees::default()
        });
        match cp.kind {
            TxKind::Received => {
                entry.in_degree += 1;
                entry.received += cp.amount;
            }
            TxKind::Sent => {
                entry.out_degree += 1;
                entry.sent += cp.amount;
            }
            TxKind::Other => {}
        }
    }

    let mut rows: Vec<WalletMetrics> = order
        .into_iter()
        .map(|wallet_id| {
            let d = degrees[wallet_id];
            WalletMetrics {
                wallet_id: wallet_id.to_string(),
                in_degree: d.in_degree,
                out_degree: d.out_degree,
                total_btc_received: d.received,
                total_btc_sent: d.sent,
                average_amount: 0.0,
                net_balance: 0.0,
                time_variance: None,
                mean_time_diff: None,
                std_dev_time_diff: None,
                min_time_diff: None,
                max_time_diff: None,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.out_degree.cmp(&a.out_degree));
    rows
}

/// Seconds between consecutive transactions of `wallet_id`, both directions, in time order.
pub fn wallet_time_differences(wallet_id: &str, transactions: &[WalletTx]) -> Result<Vec<f64>> {
    let mut times = Vec::new();
    for tx in transactions {
        if tx.amount_with(wallet_id).is_none() {
            continue;
        }
        let Some(seconds) = tx.time else { continue };
        times.push(timestamp_to_utc(seconds)?.timestamp() as f64);
    }
    times.sort_by(f64::total_cmp);
    Ok(stats::consecutive_diffs(&times))
}

/// Time statistics of `wallet_id`, `None` when it has fewer than two timed transactions.
pub fn calculate_time_variance(
    wallet_id: &str,
    transactions: &[WalletTx],
) -> Result<Option<TimeStats>> {
    let diffs = wallet_time_differences(wallet_id, transactions)?;
    if diffs.is_empty() {
        tracing::debug!("No time differences found for wallet {}", wallet_id);
        return Ok(None);
    }
    Ok(Some(TimeStats {
        variance: stats::sample_variance(&diffs),
        mean: stats::mean(&diffs),
        std_dev: stats::sample_std_dev(&diffs),
        min: stats::min(&diffs),
        max: stats::max(&diffs),
    }))
}

/// Metrics table of a chunk.
///
/// # Process
///
/// 1. Count payments per counterparty
/// 2. Keep wallets with more than [`MIN_IN_DEGREE`] bets
/// 3. Derive `average_amount` and `net_balance`
/// 4. Attach the wallet's time statistics
pub fn build_wallet_metrics(transactions: &[WalletTx]) -> Result<Vec<WalletMetrics>> {
    let mut rows: Vec<WalletMetrics> = count_wallet_degrees(transactions)
        .into_iter()
        .filter(|row| row.in_degree > MIN_IN_DEGREE)
        .collect();

    for row in &mut rows {
        row.average_amount = row.total_btc_received / row.in_degree as f64;
        row.net_balance = row.total_btc_received - row.total_btc_sent;
        if let Some(t) = calculate_time_variance(&row.wallet_id, transactions)? {
            row.time_variance = t.variance;
            row.mean_time_diff = t.mean;
            row.std_dev_time_diff = t.std_dev;
            row.min_time_diff = t.min;
            row.max_time_diff = t.max;
        }
    }
    Ok(rows)
}

/// Compute and save the metrics table of `chunk` to `{output_dir}/{chunk}_metrics.csv`.
///
/// Skipped when the table already exists, the chunk is missing or no wallet qualifies.
///
/// # Returns
///
/// Whether a table was written.
pub fn analyze_chunk_metrics(chunk: &str, chunk_dir: &Path, output_dir: &Path) -> Result<bool> {
    let metrics_file = output_dir.join(format!("{chunk}{METRICS_SUFFIX}"));
    if metrics_file.exists() {
        tracing::info!("Metrics file already exists for {}, skipping", chunk);
        return Ok(false);
    }

    let chunk_path = chunk_dir.join(format!("{chunk}.json"));
    if !chunk_path.exists() {
        tracing::warn!("Chunk file {} does not exist", chunk_path.display());
        return Ok(false);
    }

    let transactions = load_transaction_file(&chunk_path)?;
    let rows = build_wallet_metrics(&transactions)?;
    if rows.is_empty() {
        tracing::warn!("No data found for {}. Skipping metrics", chunk);
        return Ok(false);
    }

    storage::write_csv(&metrics_file, &rows)?;
    tracing::info!("Metrics saved for {} ({} wallets)", chunk, rows.len());
    Ok(true)
}

/// Summary row of one metrics table.
pub fn calculate_chunk_global_metrics(chunk: &str, rows: &[WalletMetrics]) -> GlobalMetrics {
    let net_balances: Vec<f64> = rows.iter().map(|r| r.net_balance).collect();
    let time_variances: Vec<f64> = rows.iter().filter_map(|r| r.time_variance).collect();
    let unique_wallets = rows
        .iter()
        .map(|r| r.wallet_id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();

    GlobalMetrics {
        chunk: chunk.to_string(),
        total_transactions: rows.iter().map(|r| r.in_degree + r.out_degree).sum(),
        unique_wallets,
        total_btc_received: rows.iter().map(|r| r.total_btc_received).sum(),
        mean_net_balance: stats::mean(&net_balances),
        variance_net_balance: stats::sample_variance(&net_balances),
        mean_time_variance: stats::mean(&time_variances),
        variance_time_variance: stats::sample_variance(&time_variances),
    }
}

/// Chunk names of every metrics table in `metrics_dir`, sorted.
pub fn list_metrics_chunks(metrics_dir: &Path) -> Result<Vec<String>> {
    Ok(storage::list_file_names(metrics_dir, |n| n.ends_with(METRICS_SUFFIX))?
        .into_iter()
        .map(|n| n.trim_end_matches(METRICS_SUFFIX).to_string())
        .collect())
}

/// Summarise every metrics table of the service into `chunk_global_metrics.csv`.
pub fn process_chunk_global_metrics(layout: &DataLayout) -> Result<Vec<GlobalMetrics>> {
    let metrics_dir = layout.chunk_metrics();
    let mut summary = Vec::new();
    for chunk in list_metrics_chunks(&metrics_dir)? {
        let rows: Vec<WalletMetrics> = storage::read_csv(&layout.chunk_metrics_file(&chunk))?;
        summary.push(calculate_chunk_global_metrics(&chunk, &rows));
    }

    storage::write_csv(&layout.global_metrics_file(), &summary)?;
    tracing::info!(
        "Global metrics of {} chunks saved to {}",
        summary.len(),
        layout.global_metrics_file().display()
    );
    Ok(summary)
}

/// Build graphs and metrics for every chunk of the selected interval above the size threshold.
///
/// # Errors
///
/// Returns [`PipelineError::MissingInput`] when the interval's report has not been generated.
pub fn process_selected_chunks(
    layout: &DataLayout,
    config: &Config,
    interval: u32,
) -> Result<usize> {
    let report = layout.interval_report_file(interval);
    if !report.exists() {
        return Err(PipelineError::MissingInput(format!(
            "chunk report {} (run the chunk stage first)",
            report.display()
        )));
    }

    let chunks: Vec<ChunkCount> = storage::read_csv(&report)?;
    let selected: Vec<ChunkCount> = chunks
        .into_iter()
        .filter(|c| c.count > config.transactions_for_chunk_threshold)
        .collect();
    tracing::info!(
        "{} chunks of {} months above {} transactions",
        selected.len(),
        interval,
        config.transactions_for_chunk_threshold
    );

    let chunk_dir = layout.interval_dir(interval);
    for c in &selected {
        tracing::info!("Processing chunk: {}", c.chunk);
        graph::build_graphs_for_chunk(&c.chunk, &chunk_dir, layout.service(), &layout.graphs())?;
        analyze_chunk_metrics(&c.chunk, &chunk_dir, &layout.chunk_metrics())?;
    }
    Ok(selected.len())
}
