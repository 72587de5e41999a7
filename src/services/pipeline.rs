//! Orchestration of the pipeline stages.
//!
//! Every stage is idempotent: outputs that already exist on disk are kept,
//! so an interrupted run can simply be started again.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::models::wallet::{ActivityStats, RankedWallet};
use crate::services::downloader::Downloader;
use crate::services::explorer::WalletSource;
use crate::services::merge::DataKind;
use crate::services::{chunking, gambling, merge, metrics, ranking, window};
use crate::storage::{self, DataLayout};

/// Download, rank and optionally merge wallet data.
///
/// # Process
///
/// 1. Save the first address page of every gambling wallet, unless the directory has files
/// 2. Build `wallets_info.json`, unless the info directory has files
/// 3. Rank the wallets and select the ones to download
/// 4. Download full addresses and transactions of the selected wallets
/// 5. Merge the raw files when `do_merge` is set
///
/// # Returns
///
/// The selected wallet ids.
pub async fn run_download_pipeline<S: WalletSource + ?Sized>(
    layout: &DataLayout,
    config: &Config,
    source: &S,
    do_merge: bool,
) -> Result<Vec<String>> {
    let downloader = Downloader::new(source, Duration::from_millis(config.request_delay_ms));

    let first_100 = layout.first_100_addresses();
    storage::ensure_dir(&first_100)?;
    if storage::is_dir_empty(&first_100)? {
        downloader.download_first_100_addresses(&first_100).await?;
    } else {
        tracing::info!("First 100 addresses are already downloaded");
    }

    storage::ensure_dir(&layout.info())?;
    if storage::is_dir_empty(&layout.info())? {
        downloader
            .collect_wallet_info(&first_100, &layout.wallets_info_file())
            .await?;
    }
    tracing::info!("Wallet info processed");

    let ranked = ranking::process_wallet_ranking(layout, config)?;
    let wallet_ids = ranking::select_wallet_ids(&ranked, config);
    tracing::info!("Selected wallets: {}", wallet_ids.join(", "));

    let raw_addresses = layout.raw_addresses();
    if !merge::all_files_exist(&raw_addresses, &wallet_ids, DataKind::Addresses) {
        downloader
            .download_wallet_addresses(&wallet_ids, &raw_addresses)
            .await?;
    }
    let raw_transactions = layout.raw_transactions();
    if !merge::all_files_exist(&raw_transactions, &wallet_ids, DataKind::Transactions) {
        downloader
            .download_wallet_transactions(&wallet_ids, &raw_transactions)
            .await?;
    }

    if do_merge {
        merge::merge_files(
            &wallet_ids,
            &raw_addresses,
            &layout.processed_addresses(),
            &raw_transactions,
            &layout.processed_transactions(),
        )?;
    }
    Ok(wallet_ids)
}

/// Wallet ids selected for download: the configured list, else the top of the ranking.
pub fn resolve_wallet_ids(layout: &DataLayout, config: &Config) -> Result<Vec<String>> {
    if let Some(ids) = &config.wallet_ids {
        return Ok(ids.clone());
    }
    let ranked = ranking::process_wallet_ranking(layout, config)?;
    Ok(ranking::select_wallet_ids(&ranked, config))
}

/// Split merged files of the selected wallets back into numbered raw files.
pub fn run_split(layout: &DataLayout, config: &Config) -> Result<()> {
    let wallet_ids = resolve_wallet_ids(layout, config)?;
    merge::split_all_wallet_files(
        &wallet_ids,
        &layout.processed_addresses(),
        &layout.processed_transactions(),
        &layout.raw_addresses(),
        &layout.raw_transactions(),
    )
}

/// Directory activity statistics are read from: merged files when present, else raw downloads.
pub fn activity_dir(layout: &DataLayout) -> Result<PathBuf> {
    let processed = layout.processed_transactions();
    if storage::is_dir_empty(&processed)? {
        Ok(layout.raw_transactions())
    } else {
        Ok(processed)
    }
}

/// Service ranking, with activity statistics when `with_activity` is set.
pub fn run_ranking(
    layout: &DataLayout,
    config: &Config,
    with_activity: bool,
) -> Result<(Vec<RankedWallet>, Vec<ActivityStats>)> {
    let ranked = ranking::process_wallet_ranking(layout, config)?;
    let activity = if with_activity {
        ranking::calculate_wallet_activity(&ranked, &activity_dir(layout)?)?
    } else {
        Vec::new()
    };
    Ok((ranked, activity))
}

/// Run every stage in order.
pub async fn run_all<S: WalletSource + ?Sized>(
    layout: &DataLayout,
    config: &Config,
    source: &S,
) -> Result<()> {
    tracing::info!("Step 1: download");
    run_download_pipeline(layout, config, source, config.do_merge).await?;

    tracing::info!("Step 2: chunking");
    chunking::process_chunks(layout, &config.intervals)?;

    let interval = config.selected_interval;
    tracing::info!("Step 3: graphs and metrics of {} month chunks", interval);
    metrics::process_selected_chunks(layout, config, interval)?;

    tracing::info!("Step 4: global metrics");
    metrics::process_chunk_global_metrics(layout)?;

    tracing::info!("Step 5: rolling window");
    window::run_rolling_window_analysis(layout, config, interval)?;

    tracing::info!("Step 6: gambling detection");
    gambling::run_gambling_detection(layout, config, interval)?;

    tracing::info!("Pipeline complete for {}", layout.service());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::address::AddressPage;
    use crate::models::report::ChunkCount;
    use crate::models::transaction::{TransactionPage, WalletTx};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    const START: i64 = 1_335_225_600; // 2012-04-24

    /// One service with a steady bettor and a few payouts.
    struct SingleService;

    fn service_history() -> Vec<WalletTx> {
        let mut txs: Vec<serde_json::Value> = (0..30)
            .map(|i| {
                json!({
                    "txid": format!("b{i}"),
                    "time": START + i * 60,
                    "type": "received",
                    "amount": 0.5,
                    "wallet_id": "bot"
                })
            })
            .collect();
        txs.extend((0..12).map(|i| {
            json!({
                "txid": format!("p{i}"),
                "time": START + i * 60 + 30,
                "type": "sent",
                "outputs": [{"wallet_id": "bot", "amount": 1.0}]
            })
        }));
        serde_json::from_value(serde_json::Value::Array(txs)).unwrap()
    }

    #[async_trait]
    impl WalletSource for SingleService {
        async fn gambling_wallet_ids(&self) -> Result<Vec<String>> {
            Ok(vec!["Dice".into()])
        }

        async fn transaction_count(&self, _wallet_id: &str) -> Result<u64> {
            Ok(42)
        }

        async fn address_page(
            &self,
            _wallet_id: &str,
            from: usize,
            _count: usize,
        ) -> Result<AddressPage> {
            let addresses = if from == 0 {
                json!([{"address": "1a", "incoming_txs": 42}])
            } else {
                json!([])
            };
            let page = json!({
                "found": true,
                "label": "Dice",
                "addresses_count": 1,
                "addresses": addresses
            });
            Ok(serde_json::from_value(page).unwrap())
        }

        async fn transaction_page(
            &self,
            _wallet_id: &str,
            from: usize,
            count: usize,
        ) -> Result<TransactionPage> {
            let txs: Vec<WalletTx> =
                service_history().into_iter().skip(from).take(count).collect();
            Ok(TransactionPage { found: true, label: None, txs })
        }
    }

    fn config() -> Config {
        Config::from_pairs(vec![
            ("SERVICE".to_string(), "Dice".to_string()),
            ("INTERVALS".to_string(), "3".to_string()),
            ("REQUEST_DELAY_MS".to_string(), "0".to_string()),
            ("TRANSACTIONS_FOR_CHUNK_THRESHOLD".to_string(), "10".to_string()),
            ("MIN_TRANSACTIONS_TO_ANALYZE_WALLET".to_string(), "10".to_string()),
            ("WINDOW_SIZE".to_string(), "5".to_string()),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn download_pipeline_selects_and_merges() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path(), "Dice");

        let ids = run_download_pipeline(&layout, &config(), &SingleService, true).await.unwrap();

        assert_eq!(ids, vec!["Dice"]);
        assert!(layout.wallets_info_file().exists());
        assert!(layout.raw_transactions().join("Dice_transactions_1.json").exists());
        assert!(layout.processed_transactions().join("Dice_transactions.json").exists());
        assert_eq!(activity_dir(&layout).unwrap(), layout.processed_transactions());
    }

    /// Source that refuses every transaction request.
    struct NoTransactions;

    #[async_trait]
    impl WalletSource for NoTransactions {
        async fn gambling_wallet_ids(&self) -> Result<Vec<String>> {
            SingleService.gambling_wallet_ids().await
        }

        async fn transaction_count(&self, wallet_id: &str) -> Result<u64> {
            SingleService.transaction_count(wallet_id).await
        }

        async fn address_page(
            &self,
            wallet_id: &str,
            from: usize,
            count: usize,
        ) -> Result<AddressPage> {
            SingleService.address_page(wallet_id, from, count).await
        }

        async fn transaction_page(
            &self,
            _wallet_id: &str,
            _from: usize,
            _count: usize,
        ) -> Result<TransactionPage> {
            panic!("transactions are already on disk")
        }
    }

    #[tokio::test]
    async fn completed_downloads_are_not_fetched_again() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path(), "Dice");
        run_download_pipeline(&layout, &config(), &SingleService, false)
            .await
            .unwrap();

        let ids = run_download_pipeline(&layout, &config(), &NoTransactions, false)
            .await
            .unwrap();
        assert_eq!(ids, vec!["Dice"]);
    }

    #[tokio::test]
    async fn full_run_flags_steady_flat_bettor() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path(), "Dice");
        let cfg = config();

        run_all(&layout, &cfg, &SingleService).await.unwrap();

        let report: Vec<ChunkCount> = storage::read_csv(&layout.interval_report_file(3)).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].count, 42);

        let chunk = &report[0].chunk;
        assert!(layout.chunk_metrics_file(chunk).exists());
        assert!(layout.global_metrics_file().exists());
        assert!(layout.logs().join(format!("{chunk}.json")).exists());

        let results: Vec<crate::models::report::BetAnalysis> =
            storage::read_json(&gambling::results_file(&layout.results(), chunk)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].wallet_id, "bot");
        assert_eq!(results[0].n_tx, 30);
        assert!(results[0].flat_flag);
        assert!(!results[0].martingale_flag);
    }

    #[tokio::test]
    async fn ranking_reports_activity() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path(), "Dice");
        run_download_pipeline(&layout, &config(), &SingleService, false).await.unwrap();

        let (ranked, activity) = run_ranking(&layout, &config(), true).unwrap();
        assert_eq!(ranked[0].first_100_transactions, 42);
        assert_eq!(activity[0].first_tx_date, "2012-04-24");
        assert_eq!(activity[0].transactions, 42);
    }
}
