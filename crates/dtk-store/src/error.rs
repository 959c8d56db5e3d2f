//! Error types for dtk-store.

use std::path::PathBuf;

/// Result type for dtk-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dtk-store.
///
/// Input is type-checked before it reaches the store, so every variant
/// describes a storage layer that could not complete the operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored timestamp could not be parsed back.
    #[error("Invalid timestamp {value:?} in record {id}")]
    InvalidTimestamp { id: i64, value: String },

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
