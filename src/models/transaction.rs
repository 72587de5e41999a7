//! Transaction data models as served by the block explorer.
//!
//! This module defines:
//! - `WalletTx`: one transaction of a wallet's history
//! - `TxOutput`: one output of a sent transaction
//! - `TransactionPage`: a page of the explorer's transaction listing
//! - `Counterparty`: the other side of a transaction, as seen by the analysed service

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wallet name used when a sent transaction has no outputs.
pub const UNKNOWN_WALLET: &str = "Unknown";

/// Direction of a transaction relative to the wallet whose history it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// The wallet paid someone
    Sent,
    /// Someone paid the wallet
    Received,
    /// Any other explorer type; ignored by the analysis
    Other,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Sent => "sent",
            TxKind::Received => "received",
            TxKind::Other => "other",
        }
    }
}

/// A single transaction from a wallet history.
///
/// Only the fields the analysis reads are typed. Everything else the explorer
/// returns is kept in `extra` so chunk files preserve the original record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTx {
    #[serde(default)]
    pub txid: String,

    /// Block time in unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,

    /// Raw explorer type, `"sent"` or `"received"` for the cases the analysis uses
    #[serde(rename = "type", default)]
    pub tx_type: String,

    /// Amount of a received transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,

    /// Paying wallet of a received transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,

    /// Outputs of a sent transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<TxOutput>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One output of a sent transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    #[serde(default)]
    pub wallet_id: String,

    #[serde(default)]
    pub amount: f64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The wallet on the other side of a transaction and the amount exchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Counterparty<'a> {
    pub wallet_id: &'a str,
    pub amount: f64,
    pub kind: TxKind,
}

impl WalletTx {
    pub fn kind(&self) -> TxKind {
        match self.tx_type.as_str() {
            "sent" => TxKind::Sent,
            "received" => TxKind::Received,
            _ => TxKind::Other,
        }
    }

    /// First output of a sent transaction, if any.
    pub fn first_output(&self) -> Option<&TxOutput> {
        self.outputs.as_ref().and_then(|outputs| outputs.first())
    }

    /// Resolve the counterparty of this transaction.
    ///
    /// # Rules
    ///
    /// - received: the paying `wallet_id` and `amount`
    /// - sent: the first output's wallet and amount, or `Unknown` with amount 0
    /// - anything else: no counterparty
    pub fn counterparty(&self) -> Option<Counterparty<'_>> {
        match self.kind() {
            TxKind::Received => Some(Counterparty {
                wallet_id: self.wallet_id.as_deref().unwrap_or(UNKNOWN_WALLET),
                amount: self.amount.unwrap_or(0.0),
                kind: TxKind::Received,
            }),
            TxKind::Sent => Some(match self.first_output() {
                Some(output) => Counterparty {
                    wallet_id: &output.wallet_id,
                    amount: output.amount,
                    kind: TxKind::Sent,
                },
                None => Counterparty {
                    wallet_id: UNKNOWN_WALLET,
                    amount: 0.0,
                    kind: TxKind::Sent,
                },
            }),
            TxKind::Other => None,
        }
    }

    /// A received transaction paid by `wallet_id`, i.e. a bet placed by that wallet.
    pub fn is_bet_from(&self, wallet_id: &str) -> bool {
        self.kind() == TxKind::Received && self.wallet_id.as_deref() == Some(wallet_id)
    }

    /// A sent transaction whose first output goes to `wallet_id`, i.e. a payout.
    pub fn is_payout_to(&self, wallet_id: &str) -> bool {
        self.kind() == TxKind::Sent
            && self
                .first_output()
                .is_some_and(|output| output.wallet_id == wallet_id)
    }

    /// Amount moved between the service and `wallet_id`, if this transaction involves it.
    pub fn amount_with(&self, wallet_id: &str) -> Option<f64> {
        if self.is_bet_from(wallet_id) {
            Some(self.amount.unwrap_or(0.0))
        } else if self.is_payout_to(wallet_id) {
            self.first_output().map(|output| output.amount)
        } else {
            None
        }
    }
}

/// One page of `GET /api/1/wallet`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionPage {
    #[serde(default)]
    pub found: bool,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub txs: Vec<WalletTx>,
}

/// Transaction files hold either a plain list or a merged document with a `transactions` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransactionFile {
    List(Vec<WalletTx>),
    Merged { transactions: Vec<WalletTx> },
}

impl TransactionFile {
    pub fn into_transactions(self) -> Vec<WalletTx> {
        match self {
            TransactionFile::List(txs) => txs,
            TransactionFile::Merged { transactions } => transactions,
        }
    }
}
