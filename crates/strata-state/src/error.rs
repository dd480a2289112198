//! Error types for strata-state

use thiserror::Error;

/// Errors that can occur in the manifest persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Malformed content digest
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backend (database) error
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Another deployment currently holds the target lock
    #[error("target '{key}' is locked by another deployment")]
    LockHeld { key: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
