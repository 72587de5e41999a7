//! Wallet-level summaries used for ranking services.

use serde::{Deserialize, Serialize};

/// Entry of `wallets_info.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub wallet_id: String,
    pub total_addresses: u64,
    pub total_transactions: u64,
}

/// A wallet with its ranking inputs, normalised columns and final score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedWallet {
    pub wallet_id: String,
    pub total_transactions: u64,
    pub total_addresses: u64,
    pub transactions_per_address: f64,
    pub first_100_transactions: u64,
    pub notoriety: u8,
    pub total_transactions_norm: f64,
    pub total_addresses_norm: f64,
    pub transactions_per_address_norm: f64,
    pub first_100_transactions_norm: f64,
    pub score: f64,
}

/// When a wallet was active, derived from its transaction timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityStats {
    pub wallet_id: String,
    pub first_tx_date: String,
    pub last_tx_date: String,
    pub peak_year: i32,
    /// Years either side of the peak needed to cover most of the activity
    pub activity_span_years: i32,
    pub transactions: usize,
}
