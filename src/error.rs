//! Error types for Phloem

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for Phloem operations
pub type Result<T> = std::result::Result<T, PhloemError>;

/// Main error type for Phloem
#[derive(Error, Debug)]
pub enum PhloemError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The database is locked by a concurrent writer. Retryable.
    #[error("Storage busy: {0}")]
    StorageBusy(String),

    /// Integrity check failed. Fatal to the session.
    #[error("Storage corrupt: {0} (restore from memories.db.backup or re-initialize)")]
    StorageCorrupt(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Citation not found: {0}")]
    CitationNotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Graft error: {0}")]
    Graft(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PhloemError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, PhloemError::StorageBusy(_))
    }

    /// Get error code for the JSON-RPC layer
    pub fn code(&self) -> i64 {
        match self {
            PhloemError::Validation(_) => -32602,
            PhloemError::Protocol(_) => -32600,
            _ => -32603,
        }
    }

    /// Attach a path to an I/O error for diagnostics
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PhloemError::IoPath {
            path: path.into(),
            source,
        }
    }
}

/// Map a rusqlite error, promoting lock contention to the retryable variant.
pub fn map_sqlite(err: rusqlite::Error) -> PhloemError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) => match e.code {
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                PhloemError::StorageBusy(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                PhloemError::StorageCorrupt(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => PhloemError::Database(err),
        },
        _ => PhloemError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_retryable() {
        assert!(PhloemError::StorageBusy("locked".into()).is_retryable());
        assert!(!PhloemError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn validation_maps_to_invalid_params() {
        assert_eq!(PhloemError::Validation("bad".into()).code(), -32602);
        assert_eq!(PhloemError::Storage("x".into()).code(), -32603);
    }
}
