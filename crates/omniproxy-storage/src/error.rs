//! Storage error types.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from the driver.
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on a closed store.
    #[error("store is closed")]
    Closed,

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Invalid configuration (database URL, format).
    #[error("configuration error: {0}")]
    Config(String),

    /// A bounded operation ran out of time.
    #[error("operation timed out")]
    Timeout,
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
