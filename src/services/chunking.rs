//! Calendar chunking of a wallet's transaction history.
//!
//! Transactions are grouped into consecutive periods of N months anchored at
//! the wallet's earliest transaction. Each period becomes one JSON list file
//! named `{start}_to_{end}.json`, and each interval gets a CSV report with the
//! number of transactions per chunk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::error::{PipelineError, Result};
use crate::models::report::ChunkCount;
use crate::models::transaction::{TransactionFile, WalletTx};
use crate::services::merge::numbered_file_index;
use crate::storage::{self, DataLayout};

/// Calendar period a transaction falls into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// `YYYY-MM-DD_to_YYYY-MM-DD`, the chunk name used on disk.
    pub fn label(&self) -> String {
        format!(
            "{}_to_{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

pub fn timestamp_to_utc(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| PipelineError::InvalidData(format!("timestamp {seconds} out of range")))
}

/// Period of `interval` months containing `time`, counted from `start`.
///
/// Months are counted by calendar (year and month only), so the period index
/// is `months_between(start, time) / interval`; the period starts that many
/// intervals after `start` and ends one second before the next one begins.
pub fn period_for(start: DateTime<Utc>, time: DateTime<Utc>, interval: u32) -> Result<Period> {
    let months_since_start = (time.year() - start.year()) * 12
        + (time.month() as i32 - start.month() as i32);
    let period_index = months_since_start.div_euclid(interval as i32);
    if period_index < 0 {
        return Err(PipelineError::InvalidData(format!(
            "transaction at {time} precedes chunk start {start}"
        )));
    }

    let offset = Months::new(period_index as u32 * interval);
    let overflow = || PipelineError::InvalidData(format!("period of {time} out of range"));
    let period_start = start.checked_add_months(offset).ok_or_else(overflow)?;
    let period_end = period_start
        .checked_add_months(Months::new(interval))
        .ok_or_else(overflow)?
        - Duration::seconds(1);

    Ok(Period {
        start: period_start,
        end: period_end,
    })
}

/// Transaction files `{wallet}_transactions_{i}.json` in `dir`, ordered by `i`.
pub fn wallet_transaction_files(dir: &Path, wallet_id: &str) -> Result<Vec<PathBuf>> {
    let mut numbered: Vec<(usize, String)> = storage::list_file_names(dir, |_| true)?
        .into_iter()
        .filter_map(|name| {
            numbered_file_index(&name, wallet_id, "transactions").map(|i| (i, name))
        })
        .collect();
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, name)| dir.join(name)).collect())
}

pub fn load_transaction_file(path: &Path) -> Result<Vec<WalletTx>> {
    Ok(storage::read_json::<TransactionFile>(path)?.into_transactions())
}

/// Earliest transaction time across `files`, `None` when no transaction has a time.
pub fn find_global_start_time(files: &[PathBuf]) -> Result<Option<DateTime<Utc>>> {
    let mut earliest: Option<i64> = None;
    for path in files {
        let file_min = load_transaction_file(path)?
            .iter()
            .filter_map(|tx| tx.time)
            .min();
        earliest = match (earliest, file_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    earliest.map(timestamp_to_utc).transpose()
}

/// Split a wallet's transactions into period files for every interval.
///
/// # Process
///
/// 1. Find the wallet's transaction files and the earliest timestamp
/// 2. Assign every timed transaction to one period per interval
/// 3. Write `{output_base}/{wallet}/{n}_months/{label}.json` for every non-empty period
///
/// Transactions without a time are skipped.
///
/// # Returns
///
/// Number of chunk files written.
pub fn split_transactions_into_chunks(
    wallet_id: &str,
    input_dir: &Path,
    output_base: &Path,
    intervals: &[u32],
) -> Result<usize> {
    tracing::info!("Scanning files for {}...", wallet_id);
    let files = wallet_transaction_files(input_dir, wallet_id)?;
    let Some(start) = find_global_start_time(&files)? else {
        tracing::warn!("No transactions found for {}", wallet_id);
        return Ok(0);
    };

    // interval -> chunk label -> transactions, labels in chronological order
    let mut chunks: BTreeMap<u32, BTreeMap<String, Vec<WalletTx>>> = intervals
        .iter()
        .map(|&interval| (interval, BTreeMap::new()))
        .collect();

    for path in &files {
        tracing::info!("Processing {}...", path.display());
        for tx in load_transaction_file(path)? {
            let Some(seconds) = tx.time else { continue };
            let time = timestamp_to_utc(seconds)?;
            for (&interval, periods) in chunks.iter_mut() {
                let label = period_for(start, time, interval)?.label();
                periods.entry(label).or_default().push(tx.clone());
            }
        }
    }

    let mut written = 0;
    for (interval, periods) in &chunks {
        let out_dir = output_base
            .join(wallet_id)
            .join(storage::interval_dir_name(*interval));
        storage::ensure_dir(&out_dir)?;
        for (label, txs) in periods {
            let out_file = out_dir.join(format!("{label}.json"));
            storage::write_json(&out_file, txs)?;
            tracing::info!("Saved {} txs to {}", txs.len(), out_file.display());
            written += 1;
        }
    }
    Ok(written)
}

/// Transactions per chunk file in `dir`, in file name order.
pub fn count_transactions_in_chunks(dir: &Path) -> Result<Vec<ChunkCount>> {
    let files = storage::list_file_names(dir, |name| name.ends_with(".json"))?;
    files
        .into_iter()
        .map(|name| {
            let txs: Vec<serde_json::Value> = storage::read_json(&dir.join(&name))?;
            Ok(ChunkCount {
                chunk: storage::file_stem(&name).to_string(),
                count: txs.len(),
            })
        })
        .collect()
}

/// Write one `{n}_months.csv` report per interval, chunks sorted by count descending.
pub fn generate_chunk_reports(base_dir: &Path, intervals: &[u32], output_dir: &Path) -> Result<()> {
    for &interval in intervals {
        let chunk_dir = base_dir.join(storage::interval_dir_name(interval));
        let mut counts = count_transactions_in_chunks(&chunk_dir)?;
        counts.sort_by(|a, b| b.count.cmp(&a.count));

        let report = output_dir.join(format!("{}.csv", storage::interval_dir_name(interval)));
        storage::write_csv(&report, &counts)?;
        tracing::info!("Saved report {} ({} chunks)", report.display(), counts.len());
    }
    Ok(())
}

/// Chunk the analysed service for every interval and build the reports.
///
/// Intervals whose chunk directory already exists are not re-chunked, and
/// reports are only regenerated when at least one is missing.
pub fn process_chunks(layout: &DataLayout, intervals: &[u32]) -> Result<()> {
    let missing: Vec<u32> = intervals
        .iter()
        .copied()
        .filter(|&interval| !layout.interval_dir(interval).exists())
        .collect();
    if !missing.is_empty() {
        split_transactions_into_chunks(
            layout.service(),
            &layout.raw_transactions(),
            &layout.chunks_base(),
            &missing,
        )?;
    }

    storage::ensure_dir(&layout.reports())?;
    let all_reports_exist = intervals
        .iter()
        .all(|&interval| layout.interval_report_file(interval).exists());
    if all_reports_exist {
        tracing::info!("All chunk reports already exist, skipping generation");
        return Ok(());
    }
    generate_chunk_reports(&layout.service_dir(), intervals, &layout.reports())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn periods_follow_calendar_months() {
        let start = utc(2012, 4, 24, 10);

        let first = period_for(start, utc(2012, 6, 30, 0), 3).unwrap();
        assert_eq!(first.label(), "2012-04-24_to_2012-07-24");
        assert_eq!(first.end, utc(2012, 7, 24, 10) - Duration::seconds(1));

        // July counts as the fourth month even before the 24th
        let second = period_for(start, utc(2012, 7, 1, 0), 3).unwrap();
        assert_eq!(second.start, utc(2012, 7, 24, 10));
    }

    #[test]
    fn period_start_is_clamped_to_month_end() {
        let start = utc(2013, 1, 31, 0);
        let p = period_for(start, utc(2013, 2, 10, 0), 1).unwrap();
        assert_eq!(p.start, utc(2013, 2, 28, 0));
        assert_eq!(p.label(), "2013-02-28_to_2013-03-27");
    }

    #[test]
    fn split_and_report() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path(), "Dice");
        let raw = layout.raw_transactions();
        let jan = utc(2012, 1, 15, 0).timestamp();
        let feb = utc(2012, 2, 15, 0).timestamp();
        let may = utc(2012, 5, 1, 0).timestamp();
        storage::write_json(
            &raw.join("Dice_transactions_1.json"),
            &json!([
                {"txid": "a", "time": feb, "type": "received"},
                {"txid": "b", "time": jan, "type": "sent"},
                {"txid": "no-time", "type": "sent"}
            ]),
        )
        .unwrap();
        storage::write_json(
            &raw.join("Dice_transactions_2.json"),
            &json!({"transactions": [{"txid": "c", "time": may, "type": "received"}]}),
        )
        .unwrap();

        process_chunks(&layout, &[3]).unwrap();

        let q1 = layout.interval_dir(3).join("2012-01-15_to_2012-04-14.json");
        let txs: Vec<WalletTx> = storage::read_json(&q1).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].txid, "a");

        let report: Vec<ChunkCount> = storage::read_csv(&layout.interval_report_file(3)).unwrap();
        assert_eq!(
            report,
            vec![
                ChunkCount { chunk: "2012-01-15_to_2012-04-14".into(), count: 2 },
                ChunkCount { chunk: "2012-04-15_to_2012-07-14".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn wallet_without_timed_transactions_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let untimed = json!([{"txid": "x"}]);
        storage::write_json(&tmp.path().join("W_transactions_1.json"), &untimed).unwrap();

        let out = tmp.path().join("out");
        let written = split_transactions_into_chunks("W", tmp.path(), &out, &[3]).unwrap();
        assert_eq!(written, 0);
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn transaction_files_sort_numerically() {
        let tmp = TempDir::new().unwrap();
        for i in [10, 2, 1] {
            let path = tmp.path().join(format!("W_transactions_{i}.json"));
            storage::write_json(&path, &json!([])).unwrap();
        }
        storage::write_json(&tmp.path().join("W_transactions.json"), &json!([])).unwrap();

        let files = wallet_transaction_files(tmp.path(), "W").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "W_transactions_1.json",
                "W_transactions_2.json",
                "W_transactions_10.json"
            ]
        );
    }
}
