//! Rows and documents produced by the analysis stages.
//!
//! This module defines:
//! - `ChunkCount`: one row of an interval report
//! - `WalletMetrics`, `GlobalMetrics`: per-chunk metrics tables
//! - `WindowSummary`, `WindowLog`, `RollingPoint`: rolling-window output
//! - `StrategyScore`, `BetAnalysis`: betting-strategy detection output

use serde::{Deserialize, Serialize};

/// Number of transactions in one chunk file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkCount {
    /// Chunk file name without the `.json` extension
    pub chunk: String,
    pub count: usize,
}

/// Interaction of one counterparty wallet with the service during a chunk.
///
/// `in_degree` counts payments the wallet made to the service (bets),
/// `out_degree` counts payments the service made to the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletMetrics {
    pub wallet_id: String,
    pub in_degree: u64,
    pub out_degree: u64,
    pub total_btc_received: f64,
    pub total_btc_sent: f64,
    pub average_amount: f64,
    pub net_balance: f64,
    pub time_variance: Option<f64>,
    pub mean_time_diff: Option<f64>,
    pub std_dev_time_diff: Option<f64>,
    pub min_time_diff: Option<f64>,
    pub max_time_diff: Option<f64>,
}

/// Summary of one chunk's metrics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub chunk: String,
    pub total_transactions: u64,
    pub unique_wallets: usize,
    pub total_btc_received: f64,
    pub mean_net_balance: Option<f64>,
    pub variance_net_balance: Option<f64>,
    pub mean_time_variance: Option<f64>,
    pub variance_time_variance: Option<f64>,
}

/// Rolling-window behaviour of one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub wallet_id: String,
    pub n_tx: usize,
    /// Payouts the service sent back to the wallet in the same chunk.
    #[serde(default)]
    pub n_payouts: usize,
    pub percent_low_var_windows: f64,
    pub longest_low_var_streak: usize,
    pub mean_time_diff: Option<f64>,
    pub std_time_diff: Option<f64>,
}

/// Rolling-window log written for each analysed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowLog {
    pub min_transactions: usize,
    pub wallets: Vec<WindowSummary>,
}

/// One position of a wallet's rolling series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingPoint {
    pub index: usize,
    pub time_diff: f64,
    pub rolling_mean: Option<f64>,
    pub rolling_var: Option<f64>,
    pub below_threshold: bool,
}

/// Outcome of one strategy detector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StrategyScore {
    /// Matching consecutive pairs over all pairs
    pub ratio: f64,
    pub max_streak: usize,
    pub flag: bool,
}

/// Betting-strategy analysis of one wallet in one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetAnalysis {
    pub wallet_id: String,
    pub n_tx: usize,
    pub martingale_ratio: f64,
    pub martingale_max_streak: usize,
    pub martingale_flag: bool,
    pub dalembert_ratio: f64,
    pub dalembert_max_streak: usize,
    pub dalembert_flag: bool,
    pub flat_ratio: f64,
    pub flat_max_streak: usize,
    pub flat_flag: bool,
}

impl BetAnalysis {
    pub fn new(
        wallet_id: impl Into<String>,
        n_tx: usize,
        martingale: StrategyScore,
        dalembert: StrategyScore,
        flat: StrategyScore,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            n_tx,
            martingale_ratio: martingale.ratio,
            martingale_max_streak: martingale.max_streak,
            martingale_flag: martingale.flag,
            dalembert_ratio: dalembert.ratio,
            dalembert_max_streak: dalembert.max_streak,
            dalembert_flag: dalembert.flag,
            flat_ratio: flat.ratio,
            flat_max_streak: flat.max_streak,
            flat_flag: flat.flag,
        }
    }
}
