//! Betting-strategy detection on wallets flagged by the rolling-window stage.
//!
//! Each detector compares consecutive bet amounts of a wallet:
//! - Martingale doubles the stake, so `curr / prev` is close to 2
//! - d'Alembert moves the stake by one unit, so `curr - prev` is close to ±1
//! - flat betting repeats the stake, so `curr` is close to `prev`
//!
//! A detector reports the share of matching pairs, the longest run of matches
//! and a flag raised when the share exceeds [`FLAG_RATIO`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::models::report::{BetAnalysis, StrategyScore, WindowLog};
use crate::models::transaction::WalletTx;
use crate::services::chunking::load_transaction_file;
use crate::services::stats::{self, is_close};
use crate::services::window::load_wallet_bets;
use crate::storage::{self, DataLayout};

pub const FLAG_RATIO: f64 = 0.3;

const MARTINGALE_RTOL: f64 = 0.05;
const MARTINGALE_MIN_PREV: f64 = 0.00001;
const DALEMBERT_RTOL: f64 = 0.01;
const FLAT_RTOL: f64 = 0.01;

/// Score a mask over consecutive pairs of bets.
fn score(mask: &[bool]) -> StrategyScore {
    if mask.is_empty() {
        return StrategyScore::default();
    }
    let ratio = mask.iter().filter(|&&hit| hit).count() as f64 / mask.len() as f64;
    StrategyScore {
        ratio: stats::round2(ratio),
        max_streak: stats::max_consecutive_true(mask),
        flag: ratio > FLAG_RATIO,
    }
}

fn pair_mask(amounts: &[f64], matches: impl Fn(f64, f64) -> bool) -> Vec<bool> {
    amounts.windows(2).map(|w| matches(w[0], w[1])).collect()
}

pub fn detect_martingale(amounts: &[f64]) -> StrategyScore {
    score(&pair_mask(amounts, |prev, curr| {
        prev > MARTINGALE_MIN_PREV && is_close(curr / prev, 2.0, MARTINGALE_RTOL)
    }))
}

pub fn detect_dalembert(amounts: &[f64]) -> StrategyScore {
    score(&pair_mask(amounts, |prev, curr| {
        let diff = curr - prev;
        is_close(diff, 1.0, DALEMBERT_RTOL) || is_close(diff, -1.0, DALEMBERT_RTOL)
    }))
}

pub fn detect_flat(amounts: &[f64]) -> StrategyScore {
    score(&pair_mask(amounts, |prev, curr| is_close(curr, prev, FLAT_RTOL)))
}

/// Wallets of every rolling-window log with `percent_low_var_windows >= threshold`, keyed by chunk.
///
/// Logs that cannot be read are skipped with a warning.
pub fn load_selected_wallets(
    logs_dir: &Path,
    threshold: f64,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut selected = BTreeMap::new();
    for name in storage::list_file_names(logs_dir, |n| n.ends_with(".json"))? {
        let path = logs_dir.join(&name);
        let log: WindowLog = match storage::read_json(&path) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!("Skipping log {}: {}", path.display(), e);
                continue;
            }
        };
        let wallets = log
            .wallets
            .into_iter()
            .filter(|w| w.percent_low_var_windows >= threshold)
            .map(|w| w.wallet_id)
            .collect();
        selected.insert(storage::file_stem(&name).to_string(), wallets);
    }
    Ok(selected)
}

/// Strategy analysis of one wallet's bets, `None` when it placed no bet.
pub fn analyze_wallet(wallet_id: &str, transactions: &[WalletTx]) -> Option<BetAnalysis> {
    let bets = load_wallet_bets(wallet_id, transactions);
    if bets.is_empty() {
        tracing::info!("Wallet {} has no transactions, skipping", wallet_id);
        return None;
    }
    let amounts: Vec<f64> = bets.iter().map(|tx| tx.amount.unwrap_or(f64::NAN)).collect();

    Some(BetAnalysis::new(
        wallet_id,
        bets.len(),
        detect_martingale(&amounts),
        detect_dalembert(&amounts),
        detect_flat(&amounts),
    ))
}

pub fn results_file(results_dir: &Path, period: &str) -> PathBuf {
    results_dir.join(format!("{period}_bet_analysis.json"))
}

/// Analyse the selected wallets of one period and save `{period}_bet_analysis.json`.
///
/// # Errors
///
/// Returns an error if the period's chunk file cannot be read.
pub fn analyze_period(
    period: &str,
    wallets: &[String],
    results_dir: &Path,
    chunk_dir: &Path,
) -> Result<Vec<BetAnalysis>> {
    let transactions = load_transaction_file(&chunk_dir.join(format!("{period}.json")))?;
    let results: Vec<BetAnalysis> = wallets
        .iter()
        .filter_map(|wallet_id| analyze_wallet(wallet_id, &transactions))
        .collect();

    storage::write_json(&results_file(results_dir, period), &results)?;
    Ok(results)
}

/// Run strategy detection on every period with a rolling-window log.
///
/// Chunk files are read from the `interval`-month directory.
pub fn run_gambling_detection(
    layout: &DataLayout,
    config: &Config,
    interval: u32,
) -> Result<usize> {
    let selected = load_selected_wallets(&layout.logs(), config.percent_low_var_threshold)?;
    let chunk_dir = layout.interval_dir(interval);
    let results_dir = layout.results();

    for (period, wallets) in &selected {
        let results = analyze_period(period, wallets, &results_dir, &chunk_dir)?;
        let flagged = results
            .iter()
            .filter(|r| r.martingale_flag || r.dalembert_flag || r.flat_flag)
            .count();
        tracing::info!(
            "{}: {} wallets analysed, {} flagged",
            period,
            results.len(),
            flagged
        );
    }

    tracing::info!(
        "Gambling analysis completed. Results saved in {}",
        results_dir.display()
    );
    Ok(selected.len())
}
