//! Error types for the sync engine.

use outbox_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Whether retrying an operation can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to clear up with time: network trouble, overload, outages.
    Transient,
    /// Will fail the same way on every retry.
    Permanent,
}

/// Outcome of a failed call to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No response within the allowed time.
    #[error("request timed out")]
    Timeout,

    /// The backend could not be reached (refused, reset, DNS).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The request could not be built or the response could not be read.
    #[error("malformed request or response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Creates a timeout error.
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a connection error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Creates a malformed-payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates an error for a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    /// Classifies the error.
    ///
    /// Timeouts, connection failures, HTTP 429 and 5xx are transient.
    /// Every other 4xx and malformed payloads are permanent.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Timeout | RemoteError::Connect(_) => ErrorClass::Transient,
            RemoteError::Http { status, .. } if *status == 429 || *status >= 500 => {
                ErrorClass::Transient
            }
            RemoteError::Http { .. } | RemoteError::Malformed(_) => ErrorClass::Permanent,
        }
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Errors surfaced to callers of the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The backend rejected the write; retrying will not help.
    #[error("remote store rejected the write: {0}")]
    Rejected(RemoteError),

    /// The backend is unreachable and the call does not queue.
    #[error("remote store unavailable: {0}")]
    Unavailable(RemoteError),

    /// The outbox could not be read or persisted.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The background worker could not be started.
    #[error("failed to spawn sync worker: {0}")]
    Spawn(std::io::Error),
}

impl SyncError {
    /// Returns true if the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Unavailable(_) => true,
            SyncError::Rejected(_)
            | SyncError::Store(_)
            | SyncError::Config(_)
            | SyncError::Spawn(_) => false,
        }
    }

    /// Returns the remote error, if this error came from the backend.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Rejected(e) | SyncError::Unavailable(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err.class() {
            ErrorClass::Transient => SyncError::Unavailable(err),
            ErrorClass::Permanent => SyncError::Rejected(err),
        }
    }
}
