//! Error types for the data file layer
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using DataFileError
pub type Result<T> = std::result::Result<T, DataFileError>;

/// Unified error type for data file operations
#[derive(Debug, Error)]
pub enum DataFileError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("Data file corruption detected: {0}")]
    Corruption(String),

    #[error("Unknown {context} field: {field}")]
    UnknownField { context: &'static str, field: u64 },

    // -------------------------------------------------------------------------
    // Writer Errors
    // -------------------------------------------------------------------------
    #[error("Data item too large: {size} bytes does not fit a {limit} byte mapped window")]
    ItemTooLarge { size: usize, limit: usize },

    #[error("Data file {} has reached the maximum addressable size", path.display())]
    FileFull { path: PathBuf },

    // -------------------------------------------------------------------------
    // Read Path Errors
    // -------------------------------------------------------------------------
    #[error("No data file with index {file_index} for data location {location}")]
    MissingFile { file_index: u32, location: String },

    #[error("Read of key {key} failed after {retries} retries")]
    ReadRetriesExhausted { key: u64, retries: usize },

    #[error("Index error: {0}")]
    Index(String),

    // -------------------------------------------------------------------------
    // State Machine Errors
    // -------------------------------------------------------------------------
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataFileError {
    /// Whether an index-mediated read may retry after this error.
    ///
    /// A retry re-reads the index, so it only helps when the failure came from
    /// a file that a concurrent compaction moved the data out of.
    pub fn is_transient(&self) -> bool {
        matches!(self, DataFileError::Io(_) | DataFileError::MissingFile { .. })
    }
}
