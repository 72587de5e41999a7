//! On-disk data layout and file helpers.
//!
//! This module provides utilities for:
//! - Resolving every directory and file the pipeline stages share
//! - Reading and writing pretty-printed JSON documents
//! - Reading and writing CSV reports through serde
//! - Listing directory contents in a stable order

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{PipelineError, Result};

/// Items per JSON file when downloads or merged files are split.
pub const FILE_CHUNK_SIZE: usize = 100_000;

/// Paths of every artifact produced by the pipeline.
///
/// All locations are derived from the data root and the analysed service,
/// so two services can share one data root without clobbering each other's
/// chunk, log and result files.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
    service: String,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>, service: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            service: service.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.data_dir, &config.service)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn raw_addresses(&self) -> PathBuf {
        self.root.join("raw").join("addresses")
    }

    pub fn raw_transactions(&self) -> PathBuf {
        self.root.join("raw").join("transactions")
    }

    pub fn first_100_addresses(&self) -> PathBuf {
        self.root.join("processed").join("first_100_addresses")
    }

    pub fn processed_addresses(&self) -> PathBuf {
        self.root.join("processed").join("addresses")
    }

    pub fn processed_transactions(&self) -> PathBuf {
        self.root.join("processed").join("transactions")
    }

    pub fn info(&self) -> PathBuf {
        self.root.join("processed").join("info")
    }

    pub fn wallets_info_file(&self) -> PathBuf {
        self.info().join("wallets_info.json")
    }

    /// Base directory under which chunks of every wallet are written.
    pub fn chunks_base(&self) -> PathBuf {
        self.root.join("chunks")
    }

    pub fn service_dir(&self) -> PathBuf {
        self.chunks_base().join(&self.service)
    }

    /// Chunk files of the analysed service for one interval.
    pub fn interval_dir(&self, interval: u32) -> PathBuf {
        self.service_dir().join(interval_dir_name(interval))
    }

    pub fn reports(&self) -> PathBuf {
        self.service_dir().join("reports")
    }

    pub fn interval_report_file(&self, interval: u32) -> PathBuf {
        self.reports()
            .join(format!("{}.csv", interval_dir_name(interval)))
    }

    pub fn chunk_metrics(&self) -> PathBuf {
        self.reports().join("chunk_metrics")
    }

    pub fn chunk_metrics_file(&self, chunk: &str) -> PathBuf {
        self.chunk_metrics().join(format!("{chunk}{METRICS_SUFFIX}"))
    }

    pub fn global_metrics_file(&self) -> PathBuf {
        self.reports().join("chunk_global_metrics.csv")
    }

    pub fn logs(&self) -> PathBuf {
        self.service_dir().join("logs")
    }

    pub fn plots(&self) -> PathBuf {
        self.service_dir().join("plots")
    }

    pub fn graphs(&self) -> PathBuf {
        self.root.join("graphs")
    }

    pub fn results(&self) -> PathBuf {
        self.root.join("Results").join(&self.service)
    }
}

/// File name suffix of per-chunk metrics tables.
pub const METRICS_SUFFIX: &str = "_metrics.csv";

pub fn interval_dir_name(interval: u32) -> String {
    format!("{interval}_months")
}

/// Create a directory and all of its parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))
}

/// A missing directory counts as empty.
pub fn is_dir_empty(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(PipelineError::io(dir, e)),
    }
}

/// List the names of regular files in `dir` that satisfy `keep`, sorted by name.
///
/// A missing directory yields an empty list.
pub fn list_file_names<F>(dir: &Path, keep: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> bool,
{
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let is_file = entry
            .file_type()
            .map_err(|e| PipelineError::io(entry.path(), e))?
            .is_file();
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && keep(name)
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Read and deserialize a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::json(path, e))
}

/// Serialize `value` as JSON with four-space indentation, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| PipelineError::json(path, e))?;

    fs::write(path, buf).map_err(|e| PipelineError::io(path, e))
}

/// Write `rows` as a CSV file with a header row, creating parent directories.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))
}

/// Read every row of a CSV file with a header row.
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Drop the last extension of a file name: `a.b.json` -> `a.b`.
pub fn file_stem(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}
