//! Ranking of gambling services by size and activity.
//!
//! Every wallet listed in `wallets_info.json` gets a weighted score built from
//! min-max normalised columns:
//!
//! ```text
//! score = W1·transactions + W2·addresses + W3·transactions/address
//!       + W4·first-100 incoming txs + W5·notoriety
//! ```
//!
//! Notoriety enters the score raw (0 or 1).

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Datelike;

use crate::config::Config;
use crate::error::Result;
use crate::models::address::AddressPage;
use crate::models::transaction::TransactionFile;
use crate::models::wallet::{ActivityStats, RankedWallet, WalletInfo};
use crate::services::chunking::timestamp_to_utc;
use crate::services::stats::min_max_normalize;
use crate::storage::{self, DataLayout};

/// Addresses whose incoming transactions count towards `first_100_transactions`.
pub const FIRST_ADDRESSES: usize = 100;

/// Share of a wallet's transactions its activity span must cover.
pub const ACTIVITY_COVERAGE: f64 = 0.8;

/// Ranking row of one wallet, before normalisation.
///
/// # Process
///
/// 1. `transactions_per_address` is 0 for a wallet without addresses
/// 2. `first_100_transactions` sums `incoming_txs` over the first page of addresses
/// 3. `notoriety` is 1 for a known service
pub fn build_wallet_row(
    info: &WalletInfo,
    first_page: Option<&AddressPage>,
    config: &Config,
) -> RankedWallet {
    let transactions_per_address = if info.total_addresses > 0 {
        info.total_transactions as f64 / info.total_addresses as f64
    } else {
        0.0
    };

    RankedWallet {
        wallet_id: info.wallet_id.clone(),
        total_transactions: info.total_transactions,
        total_addresses: info.total_addresses,
        transactions_per_address,
        first_100_transactions: first_page.map_or(0, |p| p.incoming_txs_of_first(FIRST_ADDRESSES)),
        notoriety: u8::from(config.is_known_service(&info.wallet_id)),
        total_transactions_norm: 0.0,
        total_addresses_norm: 0.0,
        transactions_per_address_norm: 0.0,
        first_100_transactions_norm: 0.0,
        score: 0.0,
    }
}

fn normalized(rows: &[RankedWallet], column: impl Fn(&RankedWallet) -> f64) -> Vec<f64> {
    min_max_normalize(&rows.iter().map(column).collect::<Vec<_>>())
}

/// Fill in the normalised columns and the score, then sort by score descending.
pub fn rank_wallets(mut rows: Vec<RankedWallet>, weights: [f64; 5]) -> Vec<RankedWallet> {
    let tx = normalized(&rows, |r| r.total_transactions as f64);
    let addr = normalized(&rows, |r| r.total_addresses as f64);
    let per_addr = normalized(&rows, |r| r.transactions_per_address);
    let first = normalized(&rows, |r| r.first_100_transactions as f64);

    let [w1, w2, w3, w4, w5] = weights;
    for (i, row) in rows.iter_mut().enumerate() {
        row.total_transactions_norm = tx[i];
        row.total_addresses_norm = addr[i];
        row.transactions_per_address_norm = per_addr[i];
        row.first_100_transactions_norm = first[i];
        row.score = w1 * tx[i]
            + w2 * addr[i]
            + w3 * per_addr[i]
            + w4 * first[i]
            + w5 * f64::from(row.notoriety);
    }

    rows.sort_by(|a, b| b.score.total_cmp(&a.score));
    rows
}

/// Rank every wallet of `wallets_info.json`.
///
/// A wallet without a first-address page counts 0 first-100 transactions.
pub fn process_wallet_ranking(layout: &DataLayout, config: &Config) -> Result<Vec<RankedWallet>> {
    let infos: Vec<WalletInfo> = storage::read_json(&layout.wallets_info_file())?;
    let first_100_dir = layout.first_100_addresses();

    let mut rows = Vec::with_capacity(infos.len());
    for info in &infos {
        let page_path = first_100_dir.join(format!("{}_addresses.json", info.wallet_id));
        let page = if page_path.exists() {
            Some(storage::read_json::<AddressPage>(&page_path)?)
        } else {
            tracing::warn!("No first-address page for {}", info.wallet_id);
            None
        };
        rows.push(build_wallet_row(info, page.as_ref(), config));
    }

    Ok(rank_wallets(rows, config.weights()))
}

/// Ids of the wallets to download: the configured override, else the top of the ranking.
pub fn select_wallet_ids(ranked: &[RankedWallet], config: &Config) -> Vec<String> {
    match &config.wallet_ids {
        Some(ids) => ids.clone(),
        None => ranked
            .iter()
            .take(config.top_wallets)
            .map(|r| r.wallet_id.clone())
            .collect(),
    }
}

/// Timestamps of every transaction in `{wallet}_transactions.json` and
/// `{wallet}_transactions_*.json`.
fn wallet_timestamps(wallet_id: &str, dir: &Path) -> Result<Vec<i64>> {
    let merged = format!("{wallet_id}_transactions.json");
    let numbered = format!("{wallet_id}_transactions_");
    let files = storage::list_file_names(dir, |n| {
        n == merged || (n.starts_with(&numbered) && n.ends_with(".json"))
    })?;

    let mut timestamps = Vec::new();
    for name in files {
        let file: TransactionFile = storage::read_json(&dir.join(name))?;
        timestamps.extend(file.into_transactions().into_iter().filter_map(|tx| tx.time));
    }
    Ok(timestamps)
}

/// Smallest number of years either side of `peak` covering `coverage` of `years`.
fn activity_span(years: &[i32], peak: i32, coverage: f64) -> i32 {
    let (Some(&lo), Some(&hi)) = (years.iter().min(), years.iter().max()) else {
        return 0;
    };
    let total = years.len() as f64;
    let mut span = 0;
    loop {
        let covered = years.iter().filter(|&&y| (y - peak).abs() <= span).count();
        if covered as f64 / total >= coverage || span > hi - lo {
            return span;
        }
        span += 1;
    }
}

/// First and last transaction date, busiest year and activity span of a wallet.
///
/// Ties for the busiest year go to the earliest year.
///
/// # Returns
///
/// `None` when no transaction of the wallet has a timestamp.
pub fn get_wallet_activity_stats(
    wallet_id: &str,
    dir: &Path,
    coverage: f64,
) -> Result<Option<ActivityStats>> {
    let timestamps = wallet_timestamps(wallet_id, dir)?;
    let (Some(&first), Some(&last)) = (timestamps.iter().min(), timestamps.iter().max()) else {
        return Ok(None);
    };

    let years = timestamps
        .iter()
        .map(|&t| timestamp_to_utc(t).map(|d| d.year()))
        .collect::<Result<Vec<i32>>>()?;
    let mut per_year: BTreeMap<i32, usize> = BTreeMap::new();
    for &year in &years {
        *per_year.entry(year).or_default() += 1;
    }
    let mut peak_year = years[0];
    let mut peak_count = 0;
    for (&year, &count) in &per_year {
        if count > peak_count {
            peak_year = year;
            peak_count = count;
        }
    }

    Ok(Some(ActivityStats {
        wallet_id: wallet_id.to_string(),
        first_tx_date: timestamp_to_utc(first)?.date_naive().to_string(),
        last_tx_date: timestamp_to_utc(last)?.date_naive().to_string(),
        peak_year,
        activity_span_years: activity_span(&years, peak_year, coverage),
        transactions: timestamps.len(),
    }))
}

/// Activity statistics of every ranked wallet that has transaction files in `dir`.
pub fn calculate_wallet_activity(
    ranked: &[RankedWallet],
    dir: &Path,
) -> Result<Vec<ActivityStats>> {
    let mut stats = Vec::new();
    for wallet in ranked {
        match get_wallet_activity_stats(&wallet.wallet_id, dir, ACTIVITY_COVERAGE)? {
            Some(s) => stats.push(s),
            None => tracing::info!("No timed transactions for {}", wallet.wallet_id),
        }
    }
    Ok(stats)
}
