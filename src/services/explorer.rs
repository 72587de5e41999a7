//! WalletExplorer client.
//!
//! This module talks to the public block explorer in two ways:
//! - the JSON API (`/api/1/wallet-addresses`, `/api/1/wallet`) for addresses and transactions
//! - the HTML site for the list of gambling services and per-wallet transaction totals
//!
//! Everything downstream depends on the [`WalletSource`] trait rather than on
//! the HTTP client, so download logic can run against an in-memory source.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use url::Url;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::address::AddressPage;
use crate::models::transaction::TransactionPage;

/// Browser-like user agent; the explorer rejects obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Heading of the services-list column holding gambling sites.
const GAMBLING_HEADING: &str = "Gambling:";

/// The explorer lists the pre-2013 SatoshiDice wallet under this name.
const SATOSHIDICE: &str = "SatoshiDice.com";
const SATOSHIDICE_ORIGINAL: &str = "SatoshiDice.com-original";

/// Source of wallet data.
#[async_trait]
pub trait WalletSource: Send + Sync {
    /// Names of every wallet the explorer lists as a gambling service.
    async fn gambling_wallet_ids(&self) -> Result<Vec<String>>;

    /// Total number of transactions of a wallet, 0 when unknown.
    async fn transaction_count(&self, wallet_id: &str) -> Result<u64>;

    async fn address_page(&self, wallet_id: &str, from: usize, count: usize)
    -> Result<AddressPage>;

    async fn transaction_page(
        &self,
        wallet_id: &str,
        from: usize,
        count: usize,
    ) -> Result<TransactionPage>;
}

/// HTTP implementation of [`WalletSource`] backed by `reqwest`.
///
/// # Retry Policy
///
/// - `429 Too Many Requests`: wait `retry_delay` and try again
/// - connection errors and timeouts: wait `retry_delay` and try again
/// - any other non-200 status: fail with [`PipelineError::UnexpectedStatus`]
/// - at most `max_retries` attempts per request
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    http: reqwest::Client,
    base: Url,
    retry_delay: Duration,
    max_retries: u32,
}

impl ExplorerClient {
    /// Build a client from the explorer settings in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `EXPLORER_BASE_URL` is not an absolute http(s) URL
    /// - the TLS backend of the HTTP client cannot be initialised
    pub fn new(config: &Config) -> Result<Self> {
        let base = Url::parse(&config.explorer_base_url).map_err(|e| {
            PipelineError::InvalidConfig(format!(
                "EXPLORER_BASE_URL '{}': {e}",
                config.explorer_base_url
            ))
        })?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(PipelineError::InvalidConfig(format!(
                "EXPLORER_BASE_URL must be an http(s) URL, got '{base}'"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            max_retries: config.max_retries.max(1),
        })
    }

    /// Build an absolute URL from path segments and query pairs.
    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PipelineError::InvalidConfig(format!("cannot extend URL '{}'", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// GET `url`, retrying on rate limiting and transient network failures.
    async fn get_with_retry(&self, url: &Url) -> Result<reqwest::Response> {
        for attempt in 1..=self.max_retries {
            match self.http.get(url.clone()).send().await {
                Ok(response) if response.status() == StatusCode::OK => return Ok(response),
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    tracing::warn!(
                        "Rate limited on {} (attempt {}), waiting {:?}",
                        url,
                        attempt,
                        self.retry_delay
                    );
                }
                Ok(response) => {
                    return Err(PipelineError::UnexpectedStatus {
                        status: response.status().as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    let err = PipelineError::from(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    tracing::warn!(
                        "Connection problem on {} (attempt {}): {}, waiting {:?}",
                        url,
                        attempt,
                        err,
                        self.retry_delay
                    );
                }
            }
            tokio::time::sleep(self.retry_delay).await;
        }

        Err(PipelineError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.max_retries,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let response = self.get_with_retry(url).await?;
        Ok(response.json::<T>().await?)
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        let response = self.get_with_retry(url).await?;
        Ok(response.text().await?)
    }

    fn page_query<'a>(
        wallet_id: &'a str,
        from: &'a str,
        count: &'a str,
    ) -> [(&'a str, &'a str); 3] {
        [("wallet", wallet_id), ("from", from), ("count", count)]
    }
}

#[async_trait]
impl WalletSource for ExplorerClient {
    async fn gambling_wallet_ids(&self) -> Result<Vec<String>> {
        let url = self.endpoint(&[], &[])?;
        let html = self.get_text(&url).await?;
        parse_gambling_wallet_ids(&html)
    }

    async fn transaction_count(&self, wallet_id: &str) -> Result<u64> {
        let url = self.endpoint(&["wallet", wallet_id], &[])?;
        match self.get_text(&url).await {
            Ok(html) => Ok(parse_transaction_count(&html).unwrap_or(0)),
            Err(PipelineError::UnexpectedStatus { status, .. }) => {
                tracing::warn!("Wallet page of {} answered {}, counting 0", wallet_id, status);
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    async fn address_page(
        &self,
        wallet_id: &str,
        from: usize,
        count: usize,
    ) -> Result<AddressPage> {
        let (from, count) = (from.to_string(), count.to_string());
        let url = self.endpoint(
            &["api", "1", "wallet-addresses"],
            &Self::page_query(wallet_id, &from, &count),
        )?;
        self.get_json(&url).await
    }

    async fn transaction_page(
        &self,
        wallet_id: &str,
        from: usize,
        count: usize,
    ) -> Result<TransactionPage> {
        let (from, count) = (from.to_string(), count.to_string());
        let url = self.endpoint(
            &["api", "1", "wallet"],
            &Self::page_query(wallet_id, &from, &count),
        )?;
        self.get_json(&url).await
    }
}

// ---------------------------------------------------------------------------
// HTML scraping
// ---------------------------------------------------------------------------

static SERVICES_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<table[^>]*class\s*=\s*"[^"]*\bserviceslist\b[^"]*"[^>]*>(.*?)</table>"#)
        .expect("valid services table pattern")
});
static TABLE_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").expect("valid cell pattern"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h3\b[^>]*>(.*?)</h3>").expect("valid heading pattern"));
static LIST_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<li\b[^>]*>.*?<a\b[^>]*>(.*?)</a>").expect("valid list link pattern")
});
static PAGING_SMALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?is)<div[^>]*class\s*=\s*"[^"]*\bpaging\b[^"]*"[^>]*>"#,
        r".*?<small\b[^>]*>(.*?)</small>",
    ))
    .expect("valid paging pattern")
});
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));

/// Visible text of an HTML fragment: tags removed, common entities decoded, trimmed.
fn inner_text(fragment: &str) -> String {
    TAG.replace_all(fragment, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Extract gambling wallet names from the explorer home page.
///
/// The names are the link texts of the list in the services-table cell headed
/// `Gambling:`. `SatoshiDice.com` is preceded by its original wallet,
/// `SatoshiDice.com-original`, which the explorer tracks separately.
///
/// # Errors
///
/// Returns [`PipelineError::Scrape`] when the services table or the gambling column is missing.
pub fn parse_gambling_wallet_ids(html: &str) -> Result<Vec<String>> {
    let table = SERVICES_TABLE
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| PipelineError::Scrape("services table not found".into()))?;

    let gambling_cell = TABLE_CELL
        .captures_iter(table.as_str())
        .filter_map(|c| c.get(1))
        .find(|cell| {
            HEADING
                .captures(cell.as_str())
                .and_then(|h| h.get(1))
                .is_some_and(|h| inner_text(h.as_str()) == GAMBLING_HEADING)
        })
        .ok_or_else(|| PipelineError::Scrape("gambling column not found".into()))?;

    let mut wallet_ids = Vec::new();
    for link in LIST_LINK
        .captures_iter(gambling_cell.as_str())
        .filter_map(|c| c.get(1))
    {
        let wallet_id = inner_text(link.as_str());
        if wallet_id == SATOSHIDICE {
            wallet_ids.push(SATOSHIDICE_ORIGINAL.to_string());
        }
        wallet_ids.push(wallet_id);
    }
    Ok(wallet_ids)
}

/// Extract the transaction total from a wallet page's paging block.
///
/// The count is the last number in the block's `<small>` text, e.g.
/// `Page 1 / 20 (1,987)` yields 1987. Returns `None` when no count is shown.
pub fn parse_transaction_count(html: &str) -> Option<u64> {
    let small = PAGING_SMALL.captures(html)?.get(1)?;
    inner_text(small.as_str())
        .split_whitespace()
        .rev()
        .find_map(|token| {
            token
                .trim_matches(|c| c == '(' || c == ')')
                .replace(',', "")
                .parse::<u64>()
                .ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const HOME: &str = r#"
        <html><body>
        <table class="serviceslist">
          <tr>
            <td><h3>Exchanges:</h3><ul><li><a href="/wallet/Bitstamp.net">Bitstamp.net</a></li></ul></td>
            <td><h3>Gambling:</h3>
              <ul>
                <li><a href="/wallet/SatoshiDice.com">SatoshiDice.com</a></li>
                <li><a href="/wallet/999Dice.com">999Dice.com</a> <small>old</small></li>
                <li><a href="/wallet/Dice&amp;Co">Dice&amp;Co</a></li>
              </ul>
            </td>
          </tr>
        </table>
        </body></html>"#;

    #[test]
    fn gambling_ids_come_from_gambling_column_only() {
        let ids = parse_gambling_wallet_ids(HOME).unwrap();
        assert_eq!(
            ids,
            vec![
                "SatoshiDice.com-original",
                "SatoshiDice.com",
                "999Dice.com",
                "Dice&Co"
            ]
        );
    }

    #[test]
    fn missing_table_is_a_scrape_error() {
        let err = parse_gambling_wallet_ids("<html></html>").unwrap_err();
        assert!(matches!(err, PipelineError::Scrape(_)));

        let no_gambling = r#"<table class="serviceslist"><td><h3>Pools:</h3></td></table>"#;
        assert!(parse_gambling_wallet_ids(no_gambling).is_err());
    }

    #[test]
    fn transaction_count_from_paging_block() {
        let html = r#"<div class="paging">Page 1 / 6 <small>(1,234,567)</small></div>"#;
        assert_eq!(parse_transaction_count(html), Some(1_234_567));

        let worded = concat!(
            r#"<div class="paging"><a>next</a>"#,
            "<small>Page 1 / 2 (150 transactions)</small></div>",
        );
        assert_eq!(parse_transaction_count(worded), Some(150));

        assert_eq!(parse_transaction_count(r#"<div class="paging"></div>"#), None);
    }

    #[test]
    fn endpoints_encode_wallet_names() {
        let config = Config::from_pairs(vec![(
            "EXPLORER_BASE_URL".to_string(),
            "https://explorer.test/".to_string(),
        )])
        .unwrap();
        let client = ExplorerClient::new(&config).unwrap();

        let url = client
            .endpoint(
                &["api", "1", "wallet"],
                &ExplorerClient::page_query("Dice Co", "100", "100"),
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://explorer.test/api/1/wallet?wallet=Dice+Co&from=100&count=100"
        );

        let page = client.endpoint(&["wallet", "SatoshiDice.com"], &[]).unwrap();
        assert_eq!(page.as_str(), "https://explorer.test/wallet/SatoshiDice.com");
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let config = Config::from_pairs(vec![(
            "EXPLORER_BASE_URL".to_string(),
            "mailto:someone@example.com".to_string(),
        )])
        .unwrap();
        assert!(ExplorerClient::new(&config).is_err());
    }

    /// Answer every request with `status` and `body`, counting the requests.
    async fn serve(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: text/html\r\ncontent-length: {}\r\n\
                     connection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (base, hits)
    }

    fn client(base: &str) -> ExplorerClient {
        let config = Config::from_pairs(vec![
            ("EXPLORER_BASE_URL".to_string(), base.to_string()),
            ("RETRY_DELAY_SECS".to_string(), "0".to_string()),
            ("MAX_RETRIES".to_string(), "3".to_string()),
        ])
        .unwrap();
        ExplorerClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn rate_limiting_is_retried_until_exhausted() {
        let (base, hits) = serve("429 Too Many Requests", "").await;

        let err = client(&base).transaction_page("Dice", 0, 100).await.unwrap_err();

        assert!(matches!(err, PipelineError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_statuses_fail_without_retry() {
        let (base, hits) = serve("500 Internal Server Error", "oops").await;

        let err = client(&base).address_page("Dice", 0, 100).await.unwrap_err();

        assert!(matches!(err, PipelineError::UnexpectedStatus { status: 500, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wallet_page_errors_count_zero_transactions() {
        let (base, _) = serve("500 Internal Server Error", "").await;
        assert_eq!(client(&base).transaction_count("Dice").await.unwrap(), 0);

        let (base, _) = serve(
            "200 OK",
            r#"<div class="paging">Page 1 / 2 <small>(150)</small></div>"#,
        )
        .await;
        assert_eq!(client(&base).transaction_count("Dice").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn refused_connections_are_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let err = client(&base).gambling_wallet_ids().await.unwrap_err();

        assert!(matches!(err, PipelineError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn json_pages_are_decoded() {
        let (base, _) = serve("200 OK", r#"{"found": false, "label": "Dice"}"#).await;

        let page = client(&base).transaction_page("Dice", 0, 100).await.unwrap();

        assert!(!page.found);
        assert!(page.txs.is_empty());
    }
}
