//! Error types and process exit code handling.
//!
//! This module defines every error the pipeline stages can return and how
//! each one is turned into an exit status when it reaches `main`.

use std::path::{Path, PathBuf};

/// Pipeline-wide error type.
///
/// # Error Categories
///
/// - **Network Errors**: transport failures and unexpected HTTP statuses from the explorer
/// - **Storage Errors**: file system, JSON and CSV failures, always tagged with the path involved
/// - **Input Errors**: configuration problems, missing or malformed data on disk
/// - **Scrape Errors**: explorer HTML that no longer has the expected shape
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// HTTP request failed before a response was received.
    ///
    /// This wraps any reqwest::Error using the `#[from]` attribute.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The explorer answered with a status the client does not retry on.
    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Retries for rate limiting or connection problems were exhausted.
    #[error("gave up on {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },

    /// Reading or writing a file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or serialized.
    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A CSV report could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Environment variables could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stage needs input that an earlier stage has not produced.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Data on disk does not have the expected shape.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Explorer HTML could not be scraped.
    #[error("scrape error: {0}")]
    Scrape(String),
}

/// Result alias used across the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn json(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the failure is worth retrying after a pause.
    ///
    /// Only connection failures and timeouts qualify; a malformed body never gets better.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Map the error to a process exit code.
    ///
    /// # Exit Code Mapping
    ///
    /// - `Config`, `InvalidConfig` → 2 (usage)
    /// - `MissingInput`, `InvalidData` → 3 (bad input data)
    /// - `Http`, `UnexpectedStatus`, `RetriesExhausted`, `Scrape` → 4 (remote side)
    /// - `Io`, `Json`, `Csv` → 5 (local storage)
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) | PipelineError::InvalidConfig(_) => 2,
            PipelineError::MissingInput(_) | PipelineError::InvalidData(_) => 3,
            PipelineError::Http(_)
            | PipelineError::UnexpectedStatus { .. }
            | PipelineError::RetriesExhausted { .. }
            | PipelineError::Scrape(_) => 4,
            PipelineError::Io { .. } | PipelineError::Json { .. } | PipelineError::Csv(_) => 5,
        }
    }
}
