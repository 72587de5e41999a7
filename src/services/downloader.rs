//! Paginated download of wallet data and chunked persistence.
//!
//! This module handles:
//! - saving the first address page of every gambling wallet
//! - building `wallets_info.json` from those pages and the scraped transaction totals
//! - downloading complete address and transaction histories page by page,
//!   written in files of at most [`FILE_CHUNK_SIZE`] items

use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::models::address::{AddressEntry, AddressPage};
use crate::models::transaction::WalletTx;
use crate::models::wallet::WalletInfo;
use crate::services::explorer::WalletSource;
use crate::storage::{self, FILE_CHUNK_SIZE};

/// Items requested per API page; the explorer caps pages at 100.
pub const PAGE_SIZE: usize = 100;

const FIRST_ADDRESSES_SUFFIX: &str = "_addresses.json";

/// Downloads wallet data from a [`WalletSource`] into the data directory.
pub struct Downloader<'a, S: WalletSource + ?Sized> {
    source: &'a S,
    page_delay: Duration,
    chunk_size: usize,
}

impl<'a, S: WalletSource + ?Sized> Downloader<'a, S> {
    pub fn new(source: &'a S, page_delay: Duration) -> Self {
        Self {
            source,
            page_delay,
            chunk_size: FILE_CHUNK_SIZE,
        }
    }

    /// Override the number of items per saved file.
    #[cfg(test)]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Save the first address page of every gambling wallet to `dir`.
    ///
    /// # Process
    ///
    /// 1. Take wallet ids from the file names already in `dir`, or scrape them when `dir` is empty
    /// 2. For each wallet without `{wallet}_addresses.json`, fetch page `from=0, count=100`
    /// 3. Store the page unchanged
    ///
    /// A wallet that fails to download is logged and skipped.
    ///
    /// # Returns
    ///
    /// Number of pages written.
    pub async fn download_first_100_addresses(&self, dir: &Path) -> Result<usize> {
        let existing = storage::list_file_names(dir, |_| true)?;
        let wallet_ids = if existing.is_empty() {
            self.source.gambling_wallet_ids().await?
        } else {
            let mut ids: Vec<String> = existing
                .iter()
                .filter_map(|name| name.split('_').next())
                .map(String::from)
                .collect();
            ids.dedup();
            ids
        };
        tracing::info!("{} gambling wallets to check", wallet_ids.len());

        let mut written = 0;
        for wallet_id in &wallet_ids {
            let path = dir.join(format!("{wallet_id}{FIRST_ADDRESSES_SUFFIX}"));
            if path.exists() {
                continue;
            }
            match self.source.address_page(wallet_id, 0, PAGE_SIZE).await {
                Ok(page) => {
                    storage::write_json(&path, &page)?;
                    written += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to fetch first addresses of {}: {}", wallet_id, e)
                }
            }
        }

        tracing::info!("First 100 addresses for selected wallets downloaded");
        Ok(written)
    }

    /// Build wallet info from the first address pages in `first_100_dir` and write it to `output`.
    ///
    /// Pages whose `found` flag is false are skipped. The transaction total of
    /// every remaining wallet is scraped from its explorer page.
    pub async fn collect_wallet_info(
        &self,
        first_100_dir: &Path,
        output: &Path,
    ) -> Result<Vec<WalletInfo>> {
        let files =
            storage::list_file_names(first_100_dir, |n| n.ends_with(FIRST_ADDRESSES_SUFFIX))?;

        let mut infos = Vec::new();
        for file_name in files {
            let wallet_id = file_name.trim_end_matches(FIRST_ADDRESSES_SUFFIX).to_string();
            let page: AddressPage = storage::read_json(&first_100_dir.join(&file_name))?;
            if !page.found {
                tracing::warn!("Wallet {} not found on the explorer, skipping", wallet_id);
                continue;
            }

            let total_transactions = self.source.transaction_count(&wallet_id).await?;
            tracing::info!("Added info for {}", wallet_id);
            infos.push(WalletInfo {
                wallet_id,
                total_addresses: page.addresses_count,
                total_transactions,
            });
        }

        storage::write_json(output, &infos)?;
        tracing::info!("Saved wallet info to {}", output.display());
        Ok(infos)
    }

    /// Download every address of `wallet_id` into `{dir}/{wallet}_addresses_{i}.json`.
    ///
    /// Paging stops at the first page without addresses. The label of the
    /// first page (or `unknown`) is stored with every file.
    ///
    /// # Errors
    ///
    /// Fails when a page cannot be fetched; addresses gathered up to that
    /// point are still written.
    ///
    /// # Returns
    ///
    /// Number of addresses written.
    pub async fn fetch_all_addresses(&self, wallet_id: &str, dir: &Path) -> Result<usize> {
        tracing::info!("Starting address download for wallet: {}", wallet_id);
        let mut buffer = ChunkBuffer::new(self.chunk_size);
        let mut label: Option<String> = None;
        let mut from = 0;

        let outcome = loop {
            let page = match self.source.address_page(wallet_id, from, PAGE_SIZE).await {
                Ok(page) => page,
                Err(e) => break Err(e),
            };
            if page.addresses.is_empty() {
                tracing::debug!("No more addresses for {}", wallet_id);
                break Ok(());
            }
            let label = label.get_or_insert_with(|| {
                page.label.clone().unwrap_or_else(|| "unknown".to_string())
            });

            from += PAGE_SIZE;
            for (index, items) in buffer.push(page.addresses) {
                save_addresses_chunk(dir, wallet_id, label, index, items)?;
            }
            tokio::time::sleep(self.page_delay).await;
        };

        let label = label.unwrap_or_else(|| "unknown".to_string());
        if let Some((index, items)) = buffer.finish() {
            save_addresses_chunk(dir, wallet_id, &label, index, items)?;
        }
        tracing::info!(
            "Completed address download for {} ({} addresses)",
            wallet_id,
            buffer.total()
        );
        outcome.map(|_| buffer.total())
    }

    /// Download every transaction of `wallet_id` into `{dir}/{wallet}_transactions_{i}.json`.
    ///
    /// Paging stops when the explorer reports the wallet as not found or
    /// returns an empty page.
    ///
    /// # Returns
    ///
    /// Number of transactions written.
    pub async fn fetch_wallet_transactions(
        &self,
        wallet_id: &str,
        dir: &Path,
    ) -> Result<usize> {
        tracing::info!("Starting download for wallet: {}", wallet_id);
        let mut buffer = ChunkBuffer::new(self.chunk_size);
        let mut from = 0;

        let outcome = loop {
            let page = match self.source.transaction_page(wallet_id, from, PAGE_SIZE).await {
                Ok(page) => page,
                Err(e) => break Err(e),
            };
            if !page.found {
                tracing::debug!("No transactions found for {}", wallet_id);
                break Ok(());
            }
            if page.txs.is_empty() {
                tracing::debug!("No more transactions for {}", wallet_id);
                break Ok(());
            }
            if from == 0 {
                tracing::info!(
                    "Wallet {} is labelled {}",
                    wallet_id,
                    page.label.as_deref().unwrap_or("unknown")
                );
            }

            from += PAGE_SIZE;
            for (index, items) in buffer.push(page.txs) {
                save_transactions_chunk(dir, wallet_id, index, &items)?;
            }
            tokio::time::sleep(self.page_delay).await;
        };

        if let Some((index, items)) = buffer.finish() {
            save_transactions_chunk(dir, wallet_id, index, &items)?;
        }
        tracing::info!(
            "Completed download for {} ({} transactions)",
            wallet_id,
            buffer.total()
        );
        outcome.map(|_| buffer.total())
    }

    /// Download addresses for each wallet whose first address file is missing.
    ///
    /// A wallet whose download fails is logged and the next one is started.
    pub async fn download_wallet_addresses(
        &self,
        wallet_ids: &[String],
        dir: &Path,
    ) -> Result<()> {
        storage::ensure_dir(dir)?;
        for wallet_id in wallet_ids {
            if dir.join(format!("{wallet_id}_addresses_1.json")).exists() {
                tracing::info!("Addresses of {} already downloaded", wallet_id);
                continue;
            }
            tracing::info!("Downloading all addresses for {}...", wallet_id);
            if let Err(e) = self.fetch_all_addresses(wallet_id, dir).await {
                tracing::error!("Address download for {} stopped: {}", wallet_id, e);
            }
        }
        Ok(())
    }

    /// Download transactions for each wallet whose first transaction file is missing.
    ///
    /// A wallet whose download fails is logged and the next one is started.
    pub async fn download_wallet_transactions(
        &self,
        wallet_ids: &[String],
        dir: &Path,
    ) -> Result<()> {
        storage::ensure_dir(dir)?;
        for wallet_id in wallet_ids {
            if dir.join(format!("{wallet_id}_transactions_1.json")).exists() {
                tracing::info!("Transactions of {} already downloaded", wallet_id);
                continue;
            }
            tracing::info!("Downloading all transactions for {}...", wallet_id);
            if let Err(e) = self.fetch_wallet_transactions(wallet_id, dir).await {
                tracing::error!("Transaction download for {} stopped: {}", wallet_id, e);
            }
        }
        Ok(())
    }
}

fn save_addresses_chunk(
    dir: &Path,
    wallet_id: &str,
    label: &str,
    index: usize,
    addresses: Vec<AddressEntry>,
) -> Result<()> {
    let path = dir.join(format!("{wallet_id}_addresses_{index}.json"));
    let count = addresses.len();
    let page = AddressPage {
        found: true,
        label: Some(label.to_string()),
        wallet_id: Some(wallet_id.to_string()),
        addresses_count: count as u64,
        addresses,
        extra: Default::default(),
    };
    storage::write_json(&path, &page)?;
    tracing::info!("Saved chunk {} with {} addresses", index, count);
    Ok(())
}

fn save_transactions_chunk(
    dir: &Path,
    wallet_id: &str,
    index: usize,
    transactions: &[WalletTx],
) -> Result<()> {
    let path = dir.join(format!("{wallet_id}_transactions_{index}.json"));
    storage::write_json(&path, transactions)?;
    tracing::info!("Saved chunk {} with {} transactions", index, transactions.len());
    Ok(())
}

/// Accumulates downloaded items and hands them out in numbered batches of `chunk_size`.
///
/// Batch numbers start at 1.
struct ChunkBuffer<T> {
    items: Vec<T>,
    chunk_size: usize,
    next_index: usize,
    total: usize,
}

impl<T> ChunkBuffer<T> {
    fn new(chunk_size: usize) -> Self {
        Self {
            items: Vec::new(),
            chunk_size,
            next_index: 1,
            total: 0,
        }
    }

    /// Add items and return every batch that is now full.
    fn push(&mut self, items: Vec<T>) -> Vec<(usize, Vec<T>)> {
        self.total += items.len();
        self.items.extend(items);

        let mut full = Vec::new();
        while self.items.len() >= self.chunk_size {
            let rest = self.items.split_off(self.chunk_size);
            let batch = std::mem::replace(&mut self.items, rest);
            full.push((self.next_index, batch));
            self.next_index += 1;
        }
        full
    }

    /// Take the final, partially filled batch.
    fn finish(&mut self) -> Option<(usize, Vec<T>)> {
        if self.items.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.items);
        let index = self.next_index;
        self.next_index += 1;
        Some((index, batch))
    }

    fn total(&self) -> usize {
        self.total
    }
}
