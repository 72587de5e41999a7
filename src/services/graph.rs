//! Graph construction and CSV export for chunks.
//!
//! Two graphs are built from a chunk's transactions:
//! - the **wallet graph**: the service and every counterparty wallet, one edge per payment
//! - the **transaction graph** of a single wallet: its transactions chained in time order
//!
//! Both are exported as node and edge CSV files ready for a graph database import.

use std::collections::HashMap;
use std::path::Path;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;

use crate::error::Result;
use crate::models::transaction::{TxKind, WalletTx};
use crate::services::chunking::load_transaction_file;
use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Service,
    Wallet,
    Transaction,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Service => "service",
            NodeKind::Wallet => "wallet",
            NodeKind::Transaction => "transaction",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
}

/// A payment between the service and a counterparty.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub amount: f64,
    pub timestamp: Option<i64>,
    pub txid: String,
    pub direction: TxKind,
}

/// Link between two consecutive transactions of one wallet, carrying the later one's data.
#[derive(Debug, Clone, PartialEq)]
pub struct TxLink {
    pub amount: f64,
    pub timestamp: Option<i64>,
    pub kind: TxKind,
}

/// Directed multigraph whose nodes are addressed by string id.
#[derive(Debug, Clone)]
pub struct LabeledGraph<E> {
    pub graph: DiGraph<GraphNode, E>,
    index: HashMap<String, NodeIndex>,
}

impl<E> Default for LabeledGraph<E> {
    fn default() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }
}

impl<E> LabeledGraph<E> {
    /// Index of node `id`, inserting it with `kind` on first sight.
    ///
    /// An existing node keeps the kind it was first added with.
    pub fn ensure_node(&mut self, id: &str, kind: NodeKind) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode {
            id: id.to_string(),
            kind,
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    #[cfg(test)]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn node_rows(&self) -> Vec<NodeRow<'_>> {
        self.graph
            .node_weights()
            .map(|n| NodeRow {
                id: &n.id,
                node_type: n.kind.as_str(),
            })
            .collect()
    }
}

#[derive(Serialize)]
struct NodeRow<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    node_type: &'static str,
}

#[derive(Serialize)]
struct PaymentRow<'a> {
    source: &'a str,
    target: &'a str,
    amount: f64,
    timestamp: Option<i64>,
    txid: &'a str,
    direction: &'static str,
}

#[derive(Serialize)]
struct TxLinkRow<'a> {
    source: &'a str,
    target: &'a str,
    #[serde(rename = "type")]
    link_type: &'static str,
    timestamp: Option<i64>,
    amount: f64,
}

/// Build the wallet graph of `service` from one chunk of its transactions.
///
/// # Edges
///
/// - sent: service → first output's wallet (or `Unknown`), with that output's amount
/// - received: paying wallet → service
/// - other transaction types add nothing
pub fn build_wallet_graph(service: &str, transactions: &[WalletTx]) -> LabeledGraph<Payment> {
    let mut g = LabeledGraph::default();
    let service_idx = g.ensure_node(service, NodeKind::Service);

    for tx in transactions {
        let Some(cp) = tx.counterparty() else { continue };
        let wallet_idx = g.ensure_node(cp.wallet_id, NodeKind::Wallet);
        let (from, to) = match cp.kind {
            TxKind::Sent => (service_idx, wallet_idx),
            _ => (wallet_idx, service_idx),
        };
        g.graph.add_edge(
            from,
            to,
            Payment {
                amount: cp.amount,
                timestamp: tx.time,
                txid: tx.txid.clone(),
                direction: cp.kind,
            },
        );
    }
    g
}

/// Write `nodes.csv (id,type)` and `edges.csv (source,target,amount,timestamp,txid,direction)`.
pub fn export_wallet_graph(
    g: &LabeledGraph<Payment>,
    nodes_path: &Path,
    edges_path: &Path,
) -> Result<()> {
    let edges: Vec<PaymentRow<'_>> = g
        .graph
        .edge_references()
        .map(|e| PaymentRow {
            source: &g.graph[e.source()].id,
            target: &g.graph[e.target()].id,
            amount: e.weight().amount,
            timestamp: e.weight().timestamp,
            txid: &e.weight().txid,
            direction: e.weight().direction.as_str(),
        })
        .collect();

    storage::write_csv(nodes_path, &g.node_rows())?;
    storage::write_csv(edges_path, &edges)?;
    tracing::info!(
        "Graph saved with {} nodes and {} edges",
        g.node_count(),
        g.edge_count()
    );
    Ok(())
}

/// Build and export the wallet graph of chunk `chunk` unless it was exported before.
///
/// Reads `{chunk_dir}/{chunk}.json` and writes `nodes_{chunk}.csv` and
/// `edges_{chunk}.csv` to `output_dir`. Nothing happens when the chunk file is
/// missing or either export already exists.
///
/// # Returns
///
/// Whether the graph was written.
pub fn build_graphs_for_chunk(
    chunk: &str,
    chunk_dir: &Path,
    service: &str,
    output_dir: &Path,
) -> Result<bool> {
    let chunk_path = chunk_dir.join(format!("{chunk}.json"));
    let nodes_path = output_dir.join(format!("nodes_{chunk}.csv"));
    let edges_path = output_dir.join(format!("edges_{chunk}.csv"));

    if !chunk_path.exists() {
        tracing::warn!("Chunk file {} does not exist", chunk_path.display());
        return Ok(false);
    }
    if nodes_path.exists() || edges_path.exists() {
        tracing::info!("Graph of {} already exported", chunk);
        return Ok(false);
    }

    let transactions = load_transaction_file(&chunk_path)?;
    let g = build_wallet_graph(service, &transactions);
    tracing::info!("Exporting wallet graph for chunk: {}", chunk);
    export_wallet_graph(&g, &nodes_path, &edges_path)?;
    Ok(true)
}

/// Chain the transactions between the service and `wallet_id` in time order.
///
/// Returns `None` when the wallet has no transactions in the chunk.
pub fn build_tx_graph(wallet_id: &str, transactions: &[WalletTx]) -> Option<LabeledGraph<TxLink>> {
    let mut own: Vec<(&WalletTx, f64)> = transactions
        .iter()
        .filter_map(|tx| tx.amount_with(wallet_id).map(|amount| (tx, amount)))
        .collect();
    if own.is_empty() {
        return None;
    }
    own.sort_by_key(|(tx, _)| tx.time);

    let mut g = LabeledGraph::default();
    let mut prev = g.ensure_node(&own[0].0.txid, NodeKind::Transaction);
    for (tx, amount) in &own[1..] {
        let current = g.ensure_node(&tx.txid, NodeKind::Transaction);
        g.graph.add_edge(
            prev,
            current,
            TxLink {
                amount: *amount,
                timestamp: tx.time,
                kind: tx.kind(),
            },
        );
        prev = current;
    }
    Some(g)
}

pub fn export_tx_graph(
    g: &LabeledGraph<TxLink>,
    nodes_path: &Path,
    edges_path: &Path,
) -> Result<()> {
    let edges: Vec<TxLinkRow<'_>> = g
        .graph
        .edge_references()
        .map(|e| TxLinkRow {
            source: &g.graph[e.source()].id,
            target: &g.graph[e.target()].id,
            link_type: e.weight().kind.as_str(),
            timestamp: e.weight().timestamp,
            amount: e.weight().amount,
        })
        .collect();

    storage::write_csv(nodes_path, &g.node_rows())?;
    storage::write_csv(edges_path, &edges)
}

/// Build and export the transaction graph of `wallet_id` in chunk `chunk`.
///
/// Writes `{wallet}_nodes_{chunk}.csv` and `{wallet}_edges_{chunk}.csv`.
///
/// # Returns
///
/// Whether the graph was written; false when the chunk or the wallet's transactions are missing.
pub fn build_txs_graph_for_chunk(
    wallet_id: &str,
    chunk: &str,
    chunk_dir: &Path,
    output_dir: &Path,
) -> Result<bool> {
    let chunk_path = chunk_dir.join(format!("{chunk}.json"));
    if !chunk_path.exists() {
        tracing::warn!("Chunk file {} does not exist", chunk_path.display());
        return Ok(false);
    }

    let transactions = load_transaction_file(&chunk_path)?;
    let Some(g) = build_tx_graph(wallet_id, &transactions) else {
        tracing::warn!("No transactions found for wallet {} in chunk {}", wallet_id, chunk);
        return Ok(false);
    };

    export_tx_graph(
        &g,
        &output_dir.join(format!("{wallet_id}_nodes_{chunk}.csv")),
        &output_dir.join(format!("{wallet_id}_edges_{chunk}.csv")),
    )?;
    tracing::info!("Transaction graph for wallet {} saved", wallet_id);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn chunk() -> Vec<WalletTx> {
        serde_json::from_value(json!([
            {"txid": "t1", "time": 100, "type": "received", "amount": 0.5, "wallet_id": "alice"},
            {
                "txid": "t2",
                "time": 90,
                "type": "sent",
                "outputs": [{"wallet_id": "alice", "amount": 0.9}]
            },
            {"txid": "t3", "time": 120, "type": "sent", "outputs": []},
            {"txid": "t4", "time": 130, "type": "received", "amount": 1.0, "wallet_id": "bob"},
            {"txid": "t5", "time": 140, "type": "weird"}
        ]))
        .unwrap()
    }

    #[test]
    fn wallet_graph_points_payments_at_the_right_side() {
        let g = build_wallet_graph("Dice", &chunk());

        assert_eq!(g.node_count(), 4);
        assert_eq!(g.edge_count(), 4);
        assert_eq!(g.node("Dice").unwrap().kind, NodeKind::Service);
        assert_eq!(g.node("Unknown").unwrap().kind, NodeKind::Wallet);

        let edges: Vec<(String, String, f64)> = g
            .graph
            .edge_references()
            .map(|e| {
                (
                    g.graph[e.source()].id.clone(),
                    g.graph[e.target()].id.clone(),
                    e.weight().amount,
                )
            })
            .collect();
        assert_eq!(edges[0], ("alice".into(), "Dice".into(), 0.5));
        assert_eq!(edges[1], ("Dice".into(), "alice".into(), 0.9));
        assert_eq!(edges[2], ("Dice".into(), "Unknown".into(), 0.0));
    }

    #[test]
    fn chunk_graph_exports_once() {
        let tmp = TempDir::new().unwrap();
        let chunks = tmp.path().join("chunks");
        let graphs = tmp.path().join("graphs");
        storage::write_json(&chunks.join("c1.json"), &chunk()).unwrap();

        assert!(build_graphs_for_chunk("c1", &chunks, "Dice", &graphs).unwrap());
        assert!(!build_graphs_for_chunk("c1", &chunks, "Dice", &graphs).unwrap());
        assert!(!build_graphs_for_chunk("missing", &chunks, "Dice", &graphs).unwrap());

        let nodes = fs::read_to_string(graphs.join("nodes_c1.csv")).unwrap();
        assert!(nodes.starts_with("id,type\nDice,service\nalice,wallet\n"));
        let edges = fs::read_to_string(graphs.join("edges_c1.csv")).unwrap();
        assert!(edges.starts_with(
            "source,target,amount,timestamp,txid,direction\nalice,Dice,0.5,100,t1,received\n"
        ));
    }

    #[test]
    fn tx_graph_chains_wallet_transactions_by_time() {
        let g = build_tx_graph("alice", &chunk()).unwrap();

        assert_eq!(g.node_count(), 2);
        let e = g.graph.edge_references().next().unwrap();
        assert_eq!(g.graph[e.source()].id, "t2");
        assert_eq!(g.graph[e.target()].id, "t1");
        assert_eq!(e.weight().kind, TxKind::Received);
        assert_eq!(e.weight().amount, 0.5);

        assert!(build_tx_graph("carol", &chunk()).is_none());
    }

    #[test]
    fn tx_graph_files_are_named_after_wallet() {
        let tmp = TempDir::new().unwrap();
        storage::write_json(&tmp.path().join("c1.json"), &chunk()).unwrap();

        assert!(build_txs_graph_for_chunk("alice", "c1", tmp.path(), tmp.path()).unwrap());
        let edges = fs::read_to_string(tmp.path().join("alice_edges_c1.csv")).unwrap();
        assert_eq!(edges, "source,target,type,timestamp,amount\nt2,t1,received,100,0.5\n");
        assert!(tmp.path().join("alice_nodes_c1.csv").exists());
    }
}
