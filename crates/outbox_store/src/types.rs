//! Core type definitions for the outbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A single record sent to the backend: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Opaque identifier of a queued write.
///
/// The id is assigned on enqueue and carried over when the entry moves to
/// the failed set and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generates a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall-clock instant in milliseconds since the Unix epoch.
///
/// Persisted timestamps must survive restarts, so they are wall-clock based
/// rather than `Instant`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from raw milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Returns the raw milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns this timestamp shifted forward by `delay`, saturating.
    #[must_use]
    pub fn saturating_add(self, delay: Duration) -> Self {
        let delay = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(delay))
    }

    /// Returns the time elapsed from `earlier` to `self`, or zero.
    #[must_use]
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The kind of a [`WriteOperation`], as shown in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Insert-or-update keyed by conflict columns.
    Upsert,
    /// Update of rows matching an equality filter.
    Patch,
}

impl OperationKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::Upsert => "upsert",
            OperationKind::Patch => "patch",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write destined for the remote store.
///
/// Operations are immutable once created and must be idempotent: executing
/// the same operation twice leaves the backend in the same state as
/// executing it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOperation {
    /// Insert or update `rows`, resolving conflicts on `on_conflict`.
    Upsert {
        /// Target table.
        table: String,
        /// Records to write, in order.
        rows: Vec<Row>,
        /// Comma-joined list of natural-key columns.
        on_conflict: String,
    },
    /// Set the `patch` fields on every row matching `filter`.
    Patch {
        /// Target table.
        table: String,
        /// Equality filter selecting the rows to update.
        #[serde(rename = "match")]
        filter: Row,
        /// Fields to set.
        patch: Row,
    },
}

impl WriteOperation {
    /// Creates an upsert operation.
    pub fn upsert(table: impl Into<String>, rows: Vec<Row>, on_conflict: impl Into<String>) -> Self {
        WriteOperation::Upsert {
            table: table.into(),
            rows,
            on_conflict: on_conflict.into(),
        }
    }

    /// Creates a patch operation.
    pub fn patch(table: impl Into<String>, filter: Row, patch: Row) -> Self {
        WriteOperation::Patch {
            table: table.into(),
            filter,
            patch,
        }
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            WriteOperation::Upsert { .. } => OperationKind::Upsert,
            WriteOperation::Patch { .. } => OperationKind::Patch,
        }
    }

    /// Returns the target table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            WriteOperation::Upsert { table, .. } | WriteOperation::Patch { table, .. } => table,
        }
    }

    /// Returns the conflict columns of an upsert, trimmed, without empties.
    ///
    /// Patches have no conflict columns.
    pub fn conflict_columns(&self) -> Vec<&str> {
        match self {
            WriteOperation::Upsert { on_conflict, .. } => on_conflict
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect(),
            WriteOperation::Patch { .. } => Vec::new(),
        }
    }
}
