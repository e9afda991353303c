//! Custom error types for backup, integrity and recovery operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid backup id: {0:?}")]
    InvalidId(String),

    /// A snapshot that exists but yielded no files to restore.
    #[error("Empty snapshot: {0}")]
    EmptySnapshot(String),

    /// Retryable I/O failure; carries the attempt count that was exhausted.
    #[error("Transient I/O error after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BackupError>;
