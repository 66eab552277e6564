//! Queue and failed entries.

use crate::types::{EntryId, Timestamp, WriteOperation};
use serde::{Deserialize, Serialize};

/// A write waiting for delivery.
///
/// # Invariants
///
/// - `next_try_at >= enqueued_at`
/// - `attempts` grows by exactly one per failed delivery
/// - `attempts == 0` means the entry has not been tried since it was queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Entry id.
    pub id: EntryId,
    /// The write to deliver.
    pub operation: WriteOperation,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    /// When the entry was first queued.
    pub enqueued_at: Timestamp,
    /// Earliest time the engine may try again.
    pub next_try_at: Timestamp,
    /// Error of the most recent failed attempt.
    pub last_error: Option<String>,
}

impl QueueEntry {
    /// Creates a fresh entry that is due immediately.
    pub fn new(operation: WriteOperation, now: Timestamp) -> Self {
        Self {
            id: EntryId::new(),
            operation,
            attempts: 0,
            enqueued_at: now,
            next_try_at: now,
            last_error: None,
        }
    }

    /// Returns true if the entry may be delivered at `now`.
    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_try_at <= now
    }

    /// Records one failed attempt and schedules the next one.
    pub(crate) fn record_failure(&mut self, next_try_at: Timestamp, error: String) {
        self.attempts = self.attempts.saturating_add(1);
        self.next_try_at = next_try_at.max(self.enqueued_at);
        self.last_error = Some(error);
    }

    /// Converts the entry into a terminal failure, counting the attempt
    /// that failed.
    pub(crate) fn into_failed(self, error: String, failed_at: Timestamp) -> FailedEntry {
        FailedEntry {
            id: self.id,
            operation: self.operation,
            attempts: self.attempts.saturating_add(1),
            enqueued_at: self.enqueued_at,
            failed_at,
            error,
        }
    }
}

/// A write the engine gave up on.
///
/// Failed entries are never retried automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    /// Entry id, shared with the queue entry it came from.
    pub id: EntryId,
    /// The write that could not be delivered.
    pub operation: WriteOperation,
    /// Delivery attempts made before giving up.
    pub attempts: u32,
    /// When the write was first queued.
    pub enqueued_at: Timestamp,
    /// When the engine gave up.
    pub failed_at: Timestamp,
    /// The error that made the write terminal.
    pub error: String,
}

impl FailedEntry {
    /// Re-admits the failed write to the queue with a fresh retry budget.
    pub(crate) fn into_queued(self, now: Timestamp) -> QueueEntry {
        QueueEntry {
            id: self.id,
            operation: self.operation,
            attempts: 0,
            enqueued_at: self.enqueued_at,
            next_try_at: now.max(self.enqueued_at),
            last_error: Some(self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> WriteOperation {
        WriteOperation::upsert("empresas", vec![], "id")
    }

    #[test]
    fn new_entry_is_due_immediately() {
        let now = Timestamp::from_millis(100);
        let entry = QueueEntry::new(op(), now);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.next_try_at, now);
        assert!(entry.is_due(now));
        assert!(!entry.is_due(Timestamp::from_millis(99)));
    }

    #[test]
    fn record_failure_never_schedules_before_enqueue() {
        let mut entry = QueueEntry::new(op(), Timestamp::from_millis(500));
        entry.record_failure(Timestamp::from_millis(10), "timeout".into());
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.next_try_at, Timestamp::from_millis(500));
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn failed_round_trip_keeps_identity() {
        let mut entry = QueueEntry::new(op(), Timestamp::from_millis(0));
        entry.record_failure(Timestamp::from_millis(10), "503".into());
        let id = entry.id;

        let failed = entry.into_failed("503".into(), Timestamp::from_millis(20));
        assert_eq!(failed.id, id);
        assert_eq!(failed.attempts, 2);

        let queued = failed.into_queued(Timestamp::from_millis(30));
        assert_eq!(queued.id, id);
        assert_eq!(queued.attempts, 0);
        assert_eq!(queued.next_try_at, Timestamp::from_millis(30));
        assert_eq!(queued.last_error.as_deref(), Some("503"));
    }
}
