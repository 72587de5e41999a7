//! Rolling-window analysis of the time between a wallet's bets.
//!
//! A wallet driven by a script tends to bet at a steady pace, so the variance
//! of its inter-bet times stays low over long stretches. For every heavy
//! wallet of a chunk this module computes:
//! - the differences between consecutive bet times
//! - their rolling mean and sample variance over a fixed window
//! - the share of windows below a variance threshold and the longest such run
//!
//! Results are written as one JSON log per chunk, and the rolling series of
//! each wallet is exported as CSV for plotting.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::Config;
use crate::error::Result;
use crate::models::report::{RollingPoint, WalletMetrics, WindowLog, WindowSummary};
use crate::models::transaction::WalletTx;
use crate::services::chunking::load_transaction_file;
use crate::services::metrics::list_metrics_chunks;
use crate::services::stats;
use crate::storage::{self, DataLayout};

/// Rolling-window parameters.
#[derive(Debug, Clone, Copy)]
pub struct WindowParams {
    pub window_size: usize,
    pub var_threshold: f64,
    pub min_transactions: usize,
}

impl WindowParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_size: config.window_size,
            var_threshold: config.var_threshold,
            min_transactions: config.min_transactions_to_analyze_wallet,
        }
    }
}

/// Rolling series of one wallet plus its summary.
#[derive(Debug, Clone)]
pub struct WalletWindowAnalysis {
    pub summary: WindowSummary,
    pub series: Vec<RollingPoint>,
}

fn sorted_by_time(mut txs: Vec<&WalletTx>) -> Vec<&WalletTx> {
    txs.sort_by_key(|tx| tx.time);
    txs
}

/// Bets placed by `wallet_id`, in time order.
pub fn load_wallet_bets<'a>(
    wallet_id: &str,
    transactions: &'a [WalletTx],
) -> Vec<&'a WalletTx> {
    sorted_by_time(
        transactions
            .iter()
            .filter(|tx| tx.is_bet_from(wallet_id))
            .collect(),
    )
}

/// Payouts sent to `wallet_id`, in time order.
pub fn load_wallet_payouts<'a>(
    wallet_id: &str,
    transactions: &'a [WalletTx],
) -> Vec<&'a WalletTx> {
    sorted_by_time(
        transactions
            .iter()
            .filter(|tx| tx.is_payout_to(wallet_id))
            .collect(),
    )
}

/// Seconds between consecutive transactions. Transactions without a time are ignored.
pub fn compute_time_differences(transactions: &[&WalletTx]) -> Vec<f64> {
    let times: Vec<f64> = transactions
        .iter()
        .filter_map(|tx| tx.time)
        .map(|t| t as f64)
        .collect();
    stats::consecutive_diffs(&times)
}

/// Rolling mean and variance of `time_diffs`, flagged against `var_threshold`.
pub fn compute_rolling_metrics(
    time_diffs: &[f64],
    window_size: usize,
    var_threshold: f64,
) -> Vec<RollingPoint> {
    stats::rolling_mean_var(time_diffs, window_size)
        .into_iter()
        .zip(time_diffs)
        .enumerate()
        .map(|(index, ((rolling_mean, rolling_var), &time_diff))| RollingPoint {
            index,
            time_diff,
            rolling_mean,
            rolling_var,
            below_threshold: rolling_var.is_some_and(|v| v < var_threshold),
        })
        .collect()
}

/// Summary of a wallet's rolling series.
///
/// `percent_low_var_windows` is the number of low-variance windows over the
/// number of time differences, so the leading incomplete windows count as
/// not low. A wallet with no differences scores 0.
pub fn summarize_wallet_behavior(
    wallet_id: &str,
    n_tx: usize,
    n_payouts: usize,
    time_diffs: &[f64],
    series: &[RollingPoint],
) -> WindowSummary {
    let mask: Vec<bool> = series.iter().map(|p| p.below_threshold).collect();
    let low = mask.iter().filter(|&&hit| hit).count();
    let percent = if series.is_empty() {
        0.0
    } else {
        stats::round2(low as f64 / series.len() as f64)
    };

    WindowSummary {
        wallet_id: wallet_id.to_string(),
        n_tx,
        n_payouts,
        percent_low_var_windows: percent,
        longest_low_var_streak: stats::max_consecutive_true(&mask),
        mean_time_diff: stats::mean(time_diffs).map(stats::round2),
        std_time_diff: stats::sample_std_dev(time_diffs).map(stats::round2),
    }
}

/// Rolling-window analysis of one wallet's bets in a chunk.
pub fn analyze_wallet(
    wallet_id: &str,
    transactions: &[WalletTx],
    params: &WindowParams,
) -> WalletWindowAnalysis {
    let bets = load_wallet_bets(wallet_id, transactions);
    let payouts = load_wallet_payouts(wallet_id, transactions);
    let diffs = compute_time_differences(&bets);
    let series = compute_rolling_metrics(&diffs, params.window_size, params.var_threshold);
    let summary =
        summarize_wallet_behavior(wallet_id, bets.len(), payouts.len(), &diffs, &series);
    WalletWindowAnalysis { summary, series }
}

/// Wallets of a metrics table paid at least `min_transactions` times.
pub fn get_wallets_meeting_criteria(
    rows: &[WalletMetrics],
    min_transactions: usize,
) -> Vec<String> {
    rows.iter()
        .filter(|r| r.out_degree >= min_transactions as u64)
        .map(|r| r.wallet_id.clone())
        .collect()
}

pub fn build_log_file_path(logs_dir: &Path, chunk: &str) -> PathBuf {
    logs_dir.join(format!("{chunk}.json"))
}

/// Whether an existing log was produced with the same `min_transactions`.
///
/// A log that cannot be parsed is treated as absent.
pub fn should_skip_analysis(log_path: &Path, min_transactions: usize) -> bool {
    if !log_path.exists() {
        return false;
    }
    match storage::read_json::<Value>(log_path) {
        Ok(existing) => {
            existing.get("min_transactions").and_then(Value::as_u64)
                == Some(min_transactions as u64)
        }
        Err(e) => {
            tracing::warn!("Log {} not valid, repeating analysis: {}", log_path.display(), e);
            false
        }
    }
}

/// Analyse every qualifying wallet of one chunk.
///
/// # Process
///
/// 1. Select wallets from the chunk's metrics table by `out_degree`
/// 2. Run the rolling analysis on each wallet's bets
/// 3. Keep summaries with at least `min_transactions` bets
///
/// # Returns
///
/// The log and the analyses kept in it.
pub fn analyze_wallets_for_chunk(
    metrics: &[WalletMetrics],
    transactions: &[WalletTx],
    params: &WindowParams,
) -> (WindowLog, Vec<WalletWindowAnalysis>) {
    let mut kept = Vec::new();
    for wallet_id in get_wallets_meeting_criteria(metrics, params.min_transactions) {
        let analysis = analyze_wallet(&wallet_id, transactions, params);
        if analysis.summary.n_tx >= params.min_transactions {
            kept.push(analysis);
        } else {
            tracing::debug!(
                "{} has {} bets, below {}",
                wallet_id,
                analysis.summary.n_tx,
                params.min_transactions
            );
        }
    }

    let log = WindowLog {
        min_transactions: params.min_transactions,
        wallets: kept.iter().map(|a| a.summary.clone()).collect(),
    };
    (log, kept)
}

pub fn rolling_series_file(plots_dir: &Path, wallet_id: &str) -> PathBuf {
    plots_dir.join(format!("rolling_metrics_{wallet_id}.csv"))
}

/// Run the rolling-window analysis on every metrics table of the service.
///
/// Chunk files are read from the `interval`-month directory. A chunk is
/// skipped when its log already exists for the configured minimum, and no
/// log is written when no wallet qualifies.
///
/// # Returns
///
/// Number of logs written.
pub fn run_rolling_window_analysis(
    layout: &DataLayout,
    config: &Config,
    interval: u32,
) -> Result<usize> {
    let params = WindowParams::from_config(config);
    let logs_dir = layout.logs();
    let chunk_dir = layout.interval_dir(interval);
    storage::ensure_dir(&logs_dir)?;

    let mut written = 0;
    for chunk in list_metrics_chunks(&layout.chunk_metrics())? {
        tracing::info!("Analysing period: {}", chunk);
        let log_path = build_log_file_path(&logs_dir, &chunk);
        if should_skip_analysis(&log_path, params.min_transactions) {
            tracing::info!("Log already present for {}", chunk);
            continue;
        }

        let chunk_path = chunk_dir.join(format!("{chunk}.json"));
        if !chunk_path.exists() {
            tracing::warn!("Chunk file {} not found, skipping", chunk_path.display());
            continue;
        }

        let metrics: Vec<WalletMetrics> = storage::read_csv(&layout.chunk_metrics_file(&chunk))?;
        let transactions = load_transaction_file(&chunk_path)?;
        let (log, analyses) = analyze_wallets_for_chunk(&metrics, &transactions, &params);

        for analysis in &analyses {
            storage::write_csv(
                &rolling_series_file(&layout.plots(), &analysis.summary.wallet_id),
                &analysis.series,
            )?;
        }

        if log.wallets.is_empty() {
            tracing::info!("No wallet in {} reaches {} bets", chunk, params.min_transactions);
            continue;
        }
        storage::write_json(&log_path, &log)?;
        written += 1;
    }

    tracing::info!("Analysis complete. Logs saved in {}", logs_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn bets_at(wallet: &str, times: &[i64]) -> Vec<Value> {
        times
            .iter()
            .enumerate()
            .map(|(i, t)| {
                json!({
                    "txid": format!("{wallet}{i}"),
                    "time": t,
                    "type": "received",
                    "amount": 0.1,
                    "wallet_id": wallet
                })
            })
            .collect()
    }

    fn txs(values: Vec<Value>) -> Vec<WalletTx> {
        serde_json::from_value(Value::Array(values)).unwrap()
    }

    fn params(window_size: usize, min_transactions: usize) -> WindowParams {
        WindowParams { window_size, var_threshold: 10.0, min_transactions }
    }

    fn metrics_row(wallet: &str, out_degree: u64) -> WalletMetrics {
        WalletMetrics {
            wallet_id: wallet.into(),
            in_degree: 20,
            out_degree,
            total_btc_received: 1.0,
            total_btc_sent: 1.0,
            average_amount: 0.05,
            net_balance: 0.0,
            time_variance: None,
            mean_time_diff: None,
            std_dev_time_diff: None,
            min_time_diff: None,
            max_time_diff: None,
        }
    }

    #[test]
    fn bets_and_payouts_are_sorted_by_time() {
        let mut v = bets_at("a", &[30, 10, 20]);
        let payout = |txid: &str, time: i64, to: &str| {
            json!({"txid": txid, "time": time, "type": "sent", "outputs": [{"wallet_id": to}]})
        };
        v.push(payout("p2", 50, "a"));
        v.push(payout("p1", 40, "a"));
        v.push(payout("p0", 45, "b"));
        let all = txs(v);

        let bet_times: Vec<_> = load_wallet_bets("a", &all).iter().map(|t| t.time).collect();
        assert_eq!(bet_times, vec![Some(10), Some(20), Some(30)]);
        let payouts: Vec<_> = load_wallet_payouts("a", &all)
            .iter()
            .map(|t| t.txid.as_str())
            .collect();
        assert_eq!(payouts, vec!["p1", "p2"]);

        let a = analyze_wallet("a", &all, &params(2, 1));
        assert_eq!(a.summary.n_tx, 3);
        assert_eq!(a.summary.n_payouts, 2);
    }

    #[test]
    fn steady_bettor_has_low_variance_windows() {
        // 6 bets, 10 s apart, then one after 1000 s
        let all = txs(bets_at("bot", &[0, 10, 20, 30, 40, 50, 1050]));
        let a = analyze_wallet("bot", &all, &params(3, 1));

        assert_eq!(a.summary.n_tx, 7);
        assert_eq!(a.series.len(), 6);
        assert_eq!(a.series[0].rolling_var, None);
        assert_eq!(a.series[2].rolling_var, Some(0.0));
        // windows ending at 2, 3, 4 are flat, the last one includes the gap
        assert_eq!(a.summary.longest_low_var_streak, 3);
        assert_eq!(a.summary.percent_low_var_windows, 0.5);
        assert_eq!(a.summary.mean_time_diff, Some(175.0));
    }

    #[test]
    fn wallet_without_differences_scores_zero() {
        let all = txs(bets_at("one", &[5]));
        let a = analyze_wallet("one", &all, &params(3, 1));
        assert_eq!(a.summary.percent_low_var_windows, 0.0);
        assert_eq!(a.summary.longest_low_var_streak, 0);
        assert_eq!(a.summary.mean_time_diff, None);
    }

    #[test]
    fn candidates_need_payouts_and_bets() {
        let all = txs(bets_at("a", &[0, 1, 2]));
        let metrics = vec![metrics_row("a", 5), metrics_row("b", 1), metrics_row("c", 9)];

        assert_eq!(get_wallets_meeting_criteria(&metrics, 3), vec!["a", "c"]);
        let (log, kept) = analyze_wallets_for_chunk(&metrics, &all, &params(2, 3));
        assert_eq!(log.min_transactions, 3);
        assert_eq!(kept.len(), 1);
        assert_eq!(log.wallets[0].wallet_id, "a");
    }

    #[test]
    fn existing_logs_are_reused_only_for_same_minimum() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c.json");
        assert!(!should_skip_analysis(&path, 5));

        storage::write_json(&path, &json!({"min_transactions": 5, "wallets": []})).unwrap();
        assert!(should_skip_analysis(&path, 5));
        assert!(!should_skip_analysis(&path, 6));

        std::fs::write(&path, "{not json").unwrap();
        assert!(!should_skip_analysis(&path, 5));
    }

    #[test]
    fn run_reads_chunks_of_the_given_interval() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path(), "Dice");
        let config = Config::from_pairs(vec![
            ("MIN_TRANSACTIONS_TO_ANALYZE_WALLET".to_string(), "3".to_string()),
            ("WINDOW_SIZE".to_string(), "2".to_string()),
        ])
        .unwrap();

        storage::write_json(
            &layout.interval_dir(6).join("p1.json"),
            &bets_at("a", &[0, 5, 10, 15]),
        )
        .unwrap();
        storage::write_csv(&layout.chunk_metrics_file("p1"), &[metrics_row("a", 4)]).unwrap();
        storage::write_csv(&layout.chunk_metrics_file("p2"), &[metrics_row("z", 1)]).unwrap();

        // nothing under the default 3 month directory
        assert_eq!(run_rolling_window_analysis(&layout, &config, 3).unwrap(), 0);
        assert_eq!(run_rolling_window_analysis(&layout, &config, 6).unwrap(), 1);

        let log: WindowLog = storage::read_json(&layout.logs().join("p1.json")).unwrap();
        assert_eq!(log.wallets.len(), 1);
        assert_eq!(log.wallets[0].percent_low_var_windows, 0.67);
        assert!(rolling_series_file(&layout.plots(), "a").exists());
        assert!(!layout.logs().join("p2.json").exists());

        // second run finds the log and writes nothing
        assert_eq!(run_rolling_window_analysis(&layout, &config, 6).unwrap(), 0);
    }
}
