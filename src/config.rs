//! Pipeline configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to deserialize environment variables into a type-safe struct,
//! after an optional `.env` file has been loaded with `dotenvy`.
//!
//! Every setting has a default, so the pipeline runs against an empty environment.

use serde::{Deserialize, Deserializer};

use crate::error::PipelineError;

/// Pipeline configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `SERVICE`: wallet analysed by the chunking and detection stages
/// - `DATA_DIR`: root of every file the pipeline reads or writes, defaults to `Data`
/// - `INTERVALS`: comma separated chunk lengths in months, defaults to `3,6,12,24`
/// - `SELECTED_INTERVAL`: interval processed by the graph/metrics stage
/// - `TRANSACTIONS_FOR_CHUNK_THRESHOLD`: chunks at or below this size are not processed
/// - `MIN_TRANSACTIONS_TO_ANALYZE_WALLET`: minimum bets for the rolling-window stage
/// - `WINDOW_SIZE`, `VAR_THRESHOLD`, `PERCENT_LOW_VAR_THRESHOLD`: rolling-window parameters
/// - `DO_MERGE`: merge raw downloads after fetching them
/// - `TOP_WALLETS`, `WALLET_IDS`: which wallets get a full download
/// - `W1`..`W5`: ranking weights
/// - `KNOWN_SERVICES`: comma separated well-known services (ranking notoriety)
/// - `EXPLORER_BASE_URL`, `REQUEST_TIMEOUT_SECS`, `REQUEST_DELAY_MS`,
///   `RETRY_DELAY_SECS`, `MAX_RETRIES`: block explorer client settings
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_intervals", deserialize_with = "comma_list")]
    pub intervals: Vec<u32>,

    #[serde(default = "default_selected_interval")]
    pub selected_interval: u32,

    #[serde(default = "default_chunk_threshold")]
    pub transactions_for_chunk_threshold: usize,

    #[serde(default = "default_min_transactions")]
    pub min_transactions_to_analyze_wallet: usize,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_var_threshold")]
    pub var_threshold: f64,

    #[serde(default = "default_percent_low_var_threshold")]
    pub percent_low_var_threshold: f64,

    #[serde(default)]
    pub do_merge: bool,

    #[serde(default = "default_top_wallets")]
    pub top_wallets: usize,

    /// Explicit wallet selection, replaces the ranking-based top wallets when set.
    #[serde(default, deserialize_with = "optional_comma_list")]
    pub wallet_ids: Option<Vec<String>>,

    #[serde(default = "default_w1")]
    pub w1: f64,
    #[serde(default = "default_w2")]
    pub w2: f64,
    #[serde(default = "default_w3")]
    pub w3: f64,
    #[serde(default = "default_w4")]
    pub w4: f64,
    #[serde(default = "default_w5")]
    pub w5: f64,

    #[serde(default = "default_known_services", deserialize_with = "comma_list")]
    pub known_services: Vec<String>,

    #[serde(default = "default_explorer_base_url")]
    pub explorer_base_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_service() -> String {
    "SatoshiDice.com-original".to_string()
}

fn default_data_dir() -> String {
    "Data".to_string()
}

fn default_intervals() -> Vec<u32> {
    vec![3, 6, 12, 24]
}

fn default_selected_interval() -> u32 {
    3
}

fn default_chunk_threshold() -> usize {
    100_000
}

fn default_min_transactions() -> usize {
    1000
}

fn default_window_size() -> usize {
    10
}

fn default_var_threshold() -> f64 {
    10.0
}

fn default_percent_low_var_threshold() -> f64 {
    0.50
}

fn default_top_wallets() -> usize {
    5
}

fn default_w1() -> f64 {
    0.35
}

fn default_w2() -> f64 {
    0.03
}

fn default_w3() -> f64 {
    0.25
}

fn default_w4() -> f64 {
    0.35
}

fn default_w5() -> f64 {
    0.02
}

fn default_known_services() -> Vec<String> {
    [
        "SatoshiDice.com-original",
        "SatoshiDice.com",
        "BitZillions.com",
        "999Dice.com",
        "Betcoin.ag",
        "CloudBet.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_explorer_base_url() -> String {
    "https://www.walletexplorer.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_request_delay_ms() -> u64 {
    600
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    20
}

/// Split a comma separated environment value into parsed items, ignoring blanks.
fn parse_list<T>(raw: &str) -> Result<Vec<T>, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<T>().map_err(|e| format!("'{item}': {e}")))
        .collect()
}

fn comma_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = String::deserialize(deserializer)?;
    parse_list(&raw).map_err(serde::de::Error::custom)
}

fn optional_comma_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(raw) => {
            let items: Vec<String> = parse_list(&raw).map_err(serde::de::Error::custom)?;
            Ok((!items.is_empty()).then_some(items))
        }
        None => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Environment variable values cannot be parsed into expected types
    /// - The parsed values fail [`Config::validate`]
    pub fn from_env() -> Result<Self, PipelineError> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are converted automatically: var_threshold -> VAR_THRESHOLD
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an explicit list of variables.
    ///
    /// Used by tests so they do not depend on the process environment.
    #[cfg(test)]
    pub fn from_pairs<I>(pairs: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Config>(pairs)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.intervals.is_empty() || self.intervals.contains(&0) {
            return Err(PipelineError::InvalidConfig(
                "INTERVALS must list at least one positive month count".into(),
            ));
        }
        if self.selected_interval == 0 {
            return Err(PipelineError::InvalidConfig(
                "SELECTED_INTERVAL must be positive".into(),
            ));
        }
        if self.window_size < 2 {
            return Err(PipelineError::InvalidConfig(
                "WINDOW_SIZE must be at least 2".into(),
            ));
        }
        let weights = [self.w1, self.w2, self.w3, self.w4, self.w5];
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(PipelineError::InvalidConfig(
                "ranking weights must be finite numbers".into(),
            ));
        }
        Ok(())
    }

    /// Ranking weights in column order: transactions, addresses,
    /// transactions per address, first 100 transactions, notoriety.
    pub fn weights(&self) -> [f64; 5] {
        [self.w1, self.w2, self.w3, self.w4, self.w5]
    }

    pub fn is_known_service(&self, wallet_id: &str) -> bool {
        self.known_services.iter().any(|s| s == wallet_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = Config::from_pairs(Vec::new()).unwrap();
        assert_eq!(config.service, "SatoshiDice.com-original");
        assert_eq!(config.intervals, vec![3, 6, 12, 24]);
        assert_eq!(config.transactions_for_chunk_threshold, 100_000);
        assert_eq!(config.window_size, 10);
        assert!(!config.do_merge);
        assert_eq!(config.known_services.len(), 6);
        assert!(config.wallet_ids.is_none());
        assert_eq!(config.weights(), [0.35, 0.03, 0.25, 0.35, 0.02]);
    }

    #[test]
    fn comma_lists_are_parsed() {
        let config = Config::from_pairs(pairs(&[
            ("INTERVALS", "1, 2,,6"),
            ("WALLET_IDS", "A.com,B.com"),
            ("DO_MERGE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.intervals, vec![1, 2, 6]);
        assert_eq!(
            config.wallet_ids,
            Some(vec!["A.com".to_string(), "B.com".to_string()])
        );
        assert!(config.do_merge);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_pairs(pairs(&[("INTERVALS", "3,x")])).is_err());
        assert!(Config::from_pairs(pairs(&[("INTERVALS", "0")])).is_err());
        assert!(Config::from_pairs(pairs(&[("WINDOW_SIZE", "1")])).is_err());
    }

    #[test]
    fn known_service_lookup() {
        let config = Config::from_pairs(pairs(&[("KNOWN_SERVICES", "X.com")])).unwrap();
        assert!(config.is_known_service("X.com"));
        assert!(!config.is_known_service("SatoshiDice.com"));
    }
}
