//! Address listing models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One address of a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressEntry {
    #[serde(default)]
    pub address: String,

    /// Number of transactions paying into this address
    #[serde(default)]
    pub incoming_txs: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of `GET /api/1/wallet-addresses`, also the shape of saved address files.
///
/// The first page of every gambling wallet is stored verbatim and later read
/// back for wallet info and ranking, so unknown fields are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressPage {
    #[serde(default)]
    pub found: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,

    #[serde(default)]
    pub addresses_count: u64,

    #[serde(default)]
    pub addresses: Vec<AddressEntry>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AddressPage {
    /// Sum of incoming transactions over the first `limit` addresses.
    pub fn incoming_txs_of_first(&self, limit: usize) -> u64 {
        self.addresses
            .iter()
            .take(limit)
            .map(|a| a.incoming_txs)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn incoming_txs_sum_is_capped() {
        let page: AddressPage = serde_json::from_value(json!({
            "found": true,
            "label": "Dice",
            "wallet_id": "abc",
            "addresses_count": 3,
            "addresses": [
                {"address": "1a", "incoming_txs": 4, "balance": 0.1},
                {"address": "1b", "incoming_txs": 6},
                {"address": "1c", "incoming_txs": 100}
            ]
        }))
        .unwrap();

        assert_eq!(page.incoming_txs_of_first(2), 10);
        assert_eq!(page.incoming_txs_of_first(100), 110);
        assert_eq!(page.addresses[0].extra["balance"], json!(0.1));
    }

    #[test]
    fn not_found_page_parses() {
        let page: AddressPage = serde_json::from_value(json!({"found": false})).unwrap();
        assert!(!page.found);
        assert!(page.addresses.is_empty());
    }
}
