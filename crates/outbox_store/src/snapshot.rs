//! Read-only projections for monitoring UIs.

use crate::entry::{FailedEntry, QueueEntry};
use crate::types::{EntryId, OperationKind, Timestamp};
use serde::Serialize;

/// Counts of pending and failed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    /// Entries waiting for delivery.
    pub pending: usize,
    /// Entries that gave up.
    pub failed: usize,
}

/// One pending entry as seen by a monitoring UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    /// Entry id.
    pub id: EntryId,
    /// Operation kind.
    pub op: OperationKind,
    /// Target table.
    pub table: String,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Earliest next delivery.
    pub next_try_at: Timestamp,
    /// Most recent error.
    pub last_error: Option<String>,
}

impl From<&QueueEntry> for QueueSnapshot {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            id: entry.id,
            op: entry.operation.kind(),
            table: entry.operation.table().to_string(),
            attempts: entry.attempts,
            next_try_at: entry.next_try_at,
            last_error: entry.last_error.clone(),
        }
    }
}

/// One failed entry as seen by a monitoring UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedSnapshot {
    /// Entry id.
    pub id: EntryId,
    /// Operation kind.
    pub op: OperationKind,
    /// Target table.
    pub table: String,
    /// Attempts made.
    pub attempts: u32,
    /// When the engine gave up.
    pub failed_at: Timestamp,
    /// Terminal error.
    pub error: String,
}

impl From<&FailedEntry> for FailedSnapshot {
    fn from(entry: &FailedEntry) -> Self {
        Self {
            id: entry.id,
            op: entry.operation.kind(),
            table: entry.operation.table().to_string(),
            attempts: entry.attempts,
            failed_at: entry.failed_at,
            error: entry.error.clone(),
        }
    }
}
