//! Error types for store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while loading or persisting the outbox.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process holds the store lock.
    #[error("outbox store is locked by another process: {}", path.display())]
    Locked {
        /// Directory whose lock could not be acquired.
        path: PathBuf,
    },

    /// The persisted store was written by a newer format.
    #[error("unsupported store format version: found {found}, supported up to {supported}")]
    UnsupportedVersion {
        /// Version found on disk.
        found: u16,
        /// Highest version this build understands.
        supported: u16,
    },

    /// The store path exists but is not usable.
    #[error("invalid store location: {0}")]
    InvalidLocation(String),
}
