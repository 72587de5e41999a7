//! Merging of downloaded files and splitting of merged files.
//!
//! Raw downloads are written as numbered files of at most 100k items. This
//! module joins them into one document per wallet and kind, and splits such a
//! document back into numbered list files.

use std::path::Path;

use serde_json::{Map, Value, json};

use crate::error::{PipelineError, Result};
use crate::storage::{self, FILE_CHUNK_SIZE};

/// Which wallet data a merge or split operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Addresses,
    Transactions,
}

impl DataKind {
    /// File-name suffix and the field holding the items.
    pub fn field(&self) -> &'static str {
        match self {
            DataKind::Addresses => "addresses",
            DataKind::Transactions => "transactions",
        }
    }

    pub fn count_field(&self) -> &'static str {
        match self {
            DataKind::Addresses => "addresses_count",
            DataKind::Transactions => "transactions_count",
        }
    }
}

/// Numeric index of `{wallet}_{suffix}_{i}.json`, `None` for any other name.
pub fn numbered_file_index(name: &str, wallet_id: &str, suffix: &str) -> Option<usize> {
    name.strip_prefix(wallet_id)?
        .strip_prefix('_')?
        .strip_prefix(suffix)?
        .strip_prefix('_')?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Merge every `{wallet}_*.json` file in `input_dir` into `{output_dir}/{wallet}_{suffix}.json`.
///
/// # Process
///
/// 1. Collect the wallet's JSON files, numbered files in numeric order first, then the rest by name
/// 2. Object files contribute their `data_field` items and `count_field` (or the item count)
/// 3. List files contribute every item
/// 4. Any other shape is skipped with a warning
/// 5. Write `{found: true, label, wallet_id, count_field, data_field}`
///
/// # Returns
///
/// Number of merged items.
pub fn merge_wallet_json_files(
    wallet_id: &str,
    input_dir: &Path,
    output_dir: &Path,
    suffix: &str,
    data_field: &str,
    count_field: &str,
) -> Result<usize> {
    let prefix = format!("{wallet_id}_");
    let mut files = storage::list_file_names(input_dir, |name| {
        name.starts_with(&prefix) && name.ends_with(".json")
    })?;
    files.sort_by_key(|name| {
        (
            numbered_file_index(name, wallet_id, suffix).unwrap_or(usize::MAX),
            name.clone(),
        )
    });

    let mut items: Vec<Value> = Vec::new();
    let mut count: u64 = 0;
    for file_name in &files {
        let path = input_dir.join(file_name);
        match storage::read_json::<Value>(&path)? {
            Value::Object(mut object) if object.get(data_field).is_some_and(Value::is_array) => {
                let Some(Value::Array(data)) = object.remove(data_field) else {
                    continue;
                };
                count += object
                    .get(count_field)
                    .and_then(Value::as_u64)
                    .unwrap_or(data.len() as u64);
                items.extend(data);
            }
            Value::Array(data) => {
                count += data.len() as u64;
                items.extend(data);
            }
            _ => tracing::warn!("Skipped {}, unexpected format", path.display()),
        }
    }

    let merged_len = items.len();
    let mut merged = Map::new();
    merged.insert("found".into(), json!(true));
    merged.insert("label".into(), json!(wallet_id));
    merged.insert("wallet_id".into(), json!(wallet_id));
    merged.insert(count_field.into(), json!(count));
    merged.insert(data_field.into(), Value::Array(items));

    let output = output_dir.join(format!("{wallet_id}_{suffix}.json"));
    storage::write_json(&output, &merged)?;
    tracing::info!("Merged file saved to {}", output.display());
    Ok(merged_len)
}

/// Merge one kind of data for each wallet whose merged file does not exist yet.
pub fn merge_kind(
    kind: DataKind,
    wallet_ids: &[String],
    raw_dir: &Path,
    processed_dir: &Path,
) -> Result<()> {
    storage::ensure_dir(processed_dir)?;
    for wallet_id in wallet_ids {
        let merged = processed_dir.join(format!("{wallet_id}_{}.json", kind.field()));
        if merged.exists() {
            tracing::info!("{} already exists, skipping merge", merged.display());
            continue;
        }
        merge_wallet_json_files(
            wallet_id,
            raw_dir,
            processed_dir,
            kind.field(),
            kind.field(),
            kind.count_field(),
        )?;
    }
    Ok(())
}

pub fn merge_addresses(wallet_ids: &[String], raw_dir: &Path, processed_dir: &Path) -> Result<()> {
    merge_kind(DataKind::Addresses, wallet_ids, raw_dir, processed_dir)
}

pub fn merge_transactions(
    wallet_ids: &[String],
    raw_dir: &Path,
    processed_dir: &Path,
) -> Result<()> {
    merge_kind(DataKind::Transactions, wallet_ids, raw_dir, processed_dir)
}

/// Merge addresses and transactions of every wallet.
pub fn merge_files(
    wallet_ids: &[String],
    raw_addresses: &Path,
    processed_addresses: &Path,
    raw_transactions: &Path,
    processed_transactions: &Path,
) -> Result<()> {
    merge_addresses(wallet_ids, raw_addresses, processed_addresses)?;
    merge_transactions(wallet_ids, raw_transactions, processed_transactions)?;
    tracing::info!("All JSON files merged");
    Ok(())
}

/// Split `{input_dir}/{wallet}_{suffix}.json` into lists `{output_dir}/{wallet}_{suffix}_{i}.json`.
///
/// # Returns
///
/// Number of files written.
///
/// # Errors
///
/// Returns an error if the merged file is missing or `data_field` is not a list.
pub fn split_json_file(
    wallet_id: &str,
    input_dir: &Path,
    output_dir: &Path,
    data_field: &str,
    chunk_size: usize,
    suffix: &str,
) -> Result<usize> {
    let input = input_dir.join(format!("{wallet_id}_{suffix}.json"));
    let mut document: Value = storage::read_json(&input)?;
    let items = match document.get_mut(data_field).map(Value::take) {
        Some(Value::Array(items)) => items,
        None => Vec::new(),
        Some(_) => {
            return Err(PipelineError::InvalidData(format!(
                "{}: '{data_field}' is not a list",
                input.display()
            )));
        }
    };

    let mut written = 0;
    for (i, chunk) in items.chunks(chunk_size.max(1)).enumerate() {
        let output = output_dir.join(format!("{wallet_id}_{suffix}_{}.json", i + 1));
        storage::write_json(&output, chunk)?;
        tracing::info!("Saved {} items to {}", chunk.len(), output.display());
        written += 1;
    }

    tracing::info!("Splitting complete for {} ({})", wallet_id, suffix);
    Ok(written)
}

/// Split merged addresses and transactions of every wallet back into raw files.
pub fn split_all_wallet_files(
    wallet_ids: &[String],
    processed_addresses: &Path,
    processed_transactions: &Path,
    raw_addresses: &Path,
    raw_transactions: &Path,
) -> Result<()> {
    for wallet_id in wallet_ids {
        for (kind, input, output) in [
            (DataKind::Addresses, processed_addresses, raw_addresses),
            (DataKind::Transactions, processed_transactions, raw_transactions),
        ] {
            tracing::info!("Splitting {} for {}", kind.field(), wallet_id);
            split_json_file(
                wallet_id,
                input,
                output,
                kind.field(),
                FILE_CHUNK_SIZE,
                kind.field(),
            )?;
        }
    }
    tracing::info!("All files split successfully");
    Ok(())
}

/// Whether the first numbered `kind` file exists for every wallet id.
pub fn all_files_exist(dir: &Path, wallet_ids: &[String], kind: DataKind) -> bool {
    wallet_ids
        .iter()
        .all(|id| dir.join(format!("{id}_{}_1.json", kind.field())).exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, value: Value) {
        storage::write_json(&dir.join(name), &value).unwrap();
    }

    #[test]
    fn numbered_index_requires_exact_shape() {
        assert_eq!(numbered_file_index("W_transactions_12.json", "W", "transactions"), Some(12));
        assert_eq!(numbered_file_index("W_transactions.json", "W", "transactions"), None);
        assert_eq!(numbered_file_index("W-x_transactions_1.json", "W", "transactions"), None);
    }

    #[test]
    fn merge_accepts_lists_and_documents_in_numeric_order() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw");
        let out = tmp.path().join("out");
        write(&raw, "W_transactions_2.json", json!([{"txid": "b"}]));
        write(&raw, "W_transactions_10.json", json!([{"txid": "c"}]));
        write(
            &raw,
            "W_transactions_1.json",
            json!({"transactions": [{"txid": "a"}], "transactions_count": 5}),
        );
        write(&raw, "W_broken_1.json", json!("nope"));
        write(&raw, "Other_transactions_1.json", json!([{"txid": "x"}]));

        let n = merge_wallet_json_files(
            "W",
            &raw,
            &out,
            "transactions",
            "transactions",
            "transactions_count",
        )
        .unwrap();
        assert_eq!(n, 3);

        let merged: Value = storage::read_json(&out.join("W_transactions.json")).unwrap();
        assert_eq!(merged["found"], json!(true));
        assert_eq!(merged["wallet_id"], json!("W"));
        assert_eq!(merged["transactions_count"], json!(7));
        let ids: Vec<&str> = merged["transactions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["txid"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_kind_skips_existing_outputs() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw");
        let out = tmp.path().join("out");
        write(&raw, "W_addresses_1.json", json!({"addresses": [{"address": "1a"}]}));
        write(&out, "W_addresses.json", json!({"sentinel": true}));

        merge_addresses(&["W".to_string()], &raw, &out).unwrap();

        let kept: Value = storage::read_json(&out.join("W_addresses.json")).unwrap();
        assert_eq!(kept["sentinel"], json!(true));
    }

    #[test]
    fn split_writes_numbered_lists() {
        let tmp = TempDir::new().unwrap();
        let items: Vec<Value> = (0..5).map(|i| json!({"address": i})).collect();
        write(tmp.path(), "W_addresses.json", json!({"addresses": items}));
        let out = tmp.path().join("split");

        let files = split_json_file("W", tmp.path(), &out, "addresses", 2, "addresses").unwrap();

        assert_eq!(files, 3);
        let last: Vec<Value> = storage::read_json(&out.join("W_addresses_3.json")).unwrap();
        assert_eq!(last, vec![json!({"address": 4})]);
    }

    #[test]
    fn split_rejects_non_list_field() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "W_addresses.json", json!({"addresses": 3}));
        assert!(split_json_file("W", tmp.path(), tmp.path(), "addresses", 2, "addresses").is_err());
    }

    #[test]
    fn all_files_exist_looks_for_first_numbered_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("A_transactions_1.json"), "[]").unwrap();
        fs::write(tmp.path().join("B.json"), "[]").unwrap();
        let a = vec!["A".to_string()];

        assert!(all_files_exist(tmp.path(), &a, DataKind::Transactions));
        assert!(!all_files_exist(tmp.path(), &a, DataKind::Addresses));
        assert!(!all_files_exist(
            tmp.path(),
            &["A".to_string(), "B".to_string()],
            DataKind::Transactions
        ));
    }
}
