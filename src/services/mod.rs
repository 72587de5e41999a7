//! Pipeline services.
//!
//! Services contain the pipeline logic, separated from the CLI commands.
//! Network access goes through the `explorer` client; every other service
//! reads and writes the data directory described by `storage::DataLayout`.

/// Calendar chunking of transaction histories
pub mod chunking;
/// Paginated download of wallet data
pub mod downloader;
/// WalletExplorer HTTP client and HTML scraping
pub mod explorer;
/// Betting-strategy detection
pub mod gambling;
/// Wallet and transaction graphs with CSV export
pub mod graph;
/// Merging and splitting of downloaded files
pub mod merge;
/// Per-chunk wallet metrics and their summaries
pub mod metrics;
/// Stage orchestration
pub mod pipeline;
/// Service ranking and activity statistics
pub mod ranking;
/// Numeric helpers shared by the analysis stages
pub mod stats;
/// Rolling-window analysis of inter-bet times
pub mod window;
