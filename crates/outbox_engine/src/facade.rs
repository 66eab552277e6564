//! Public write entrypoints and introspection.

use crate::clock::{Clock, SystemClock};
use crate::config::{RemoteConfig, SyncConfig};
use crate::engine::{EngineStats, SyncEngine};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::http::HttpRemoteStore;
use crate::remote::{ConnectivityProbe, RemoteStore};
use outbox_store::{
    EntryId, FailedSnapshot, OutboxStore, QueueSnapshot, QueueStats, Row, StoreConfig,
    WriteOperation,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a queued write call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStatus {
    /// The remote store accepted the write.
    Synced,
    /// The write is durably queued for background delivery.
    Queued,
}

/// Result of [`SyncClient::upsert_with_queue`] and
/// [`SyncClient::patch_with_queue`].
///
/// Serializes as `{"status": "synced"}` or
/// `{"status": "queued", "entry_id": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Outcome status.
    pub status: WriteStatus,
    /// Id of the queue entry, when queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,
}

impl WriteOutcome {
    fn synced() -> Self {
        Self {
            status: WriteStatus::Synced,
            entry_id: None,
        }
    }

    fn queued(id: EntryId) -> Self {
        Self {
            status: WriteStatus::Queued,
            entry_id: Some(id),
        }
    }

    /// Returns true if the write was queued rather than delivered.
    pub fn is_queued(&self) -> bool {
        self.status == WriteStatus::Queued
    }
}

/// Entry point for writes to the remote store.
///
/// Queued writes try the remote store once with a short timeout. If that
/// fails for a reason that may clear up, the write is persisted to the
/// outbox and the call returns [`WriteStatus::Queued`]; the background
/// engine delivers it later. Writes the remote store rejects are returned
/// to the caller as [`SyncError::Rejected`] and never queued.
///
/// After a transient failure the client remembers that the backend looked
/// unreachable and pings it before the next attempt. A failed ping queues
/// the write straight away instead of waiting out the fast-path timeout.
///
/// Dropping the client stops the background worker.
pub struct SyncClient<R: RemoteStore + ConnectivityProbe + 'static> {
    engine: SyncEngine<R>,
    offline_hint: AtomicBool,
}

impl SyncClient<HttpRemoteStore> {
    /// Connects to a REST backend with a file-backed outbox at
    /// `config.store_path`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid base URL, `Store` if the outbox
    /// cannot be opened or is locked by another process, and `Spawn` if the
    /// worker cannot be started.
    pub fn connect(remote: &RemoteConfig, config: SyncConfig) -> SyncResult<Self> {
        let http = HttpRemoteStore::connect(remote)?;
        let store = OutboxStore::open_file(&StoreConfig::new(&config.store_path))?;
        Self::new(config, Arc::new(http), Arc::new(store))
    }
}

impl<R: RemoteStore + ConnectivityProbe + 'static> SyncClient<R> {
    /// Creates a client using the system clock.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if `config.start_worker` is set and the worker cannot
    /// be started.
    pub fn new(config: SyncConfig, remote: Arc<R>, store: Arc<OutboxStore>) -> SyncResult<Self> {
        Self::with_clock(config, remote, store, Arc::new(SystemClock))
    }

    /// Creates a client with a custom clock.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if `config.start_worker` is set and the worker cannot
    /// be started.
    pub fn with_clock(
        config: SyncConfig,
        remote: Arc<R>,
        store: Arc<OutboxStore>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let start_worker = config.start_worker;
        let engine = SyncEngine::new(config, remote, store, clock);
        if start_worker {
            engine.start()?;
        }
        Ok(Self {
            engine,
            offline_hint: AtomicBool::new(false),
        })
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// Returns true if the last remote call failed transiently.
    pub fn looks_offline(&self) -> bool {
        self.offline_hint.load(Ordering::SeqCst)
    }

    fn note_outcome(&self, outcome: &Result<(), RemoteError>) {
        let offline = matches!(outcome, Err(e) if e.is_transient());
        self.offline_hint.store(offline, Ordering::SeqCst);
    }

    fn enqueue(&self, operation: WriteOperation, cause: Option<String>) -> SyncResult<WriteOutcome> {
        let table = operation.table().to_string();
        let entry = self
            .engine
            .store()
            .enqueue(operation, self.engine.now(), cause)?;
        info!(
            entry_id = %entry.id,
            table = %table,
            op = %entry.operation.kind(),
            error = entry.last_error.as_deref().unwrap_or("queued behind earlier writes"),
            "write queued"
        );
        Ok(WriteOutcome::queued(entry.id))
    }

    /// Tries `operation` once on the fast path, queueing it on transient
    /// failure.
    ///
    /// A write to a table with queued writes is queued behind them without
    /// a remote call, so it cannot be overtaken by an older one. The ping
    /// made while the backend looks offline counts against the fast-path
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the remote store refused the write and `Store`
    /// if a write that had to be queued could not be persisted.
    pub fn write_with_queue(&self, operation: WriteOperation) -> SyncResult<WriteOutcome> {
        let config = self.engine.config();

        if self.engine.store().has_pending_for(operation.table()) {
            debug!(table = operation.table(), "earlier writes still queued, skipping fast path");
            return self.enqueue(operation, None);
        }

        let started = Instant::now();
        if self.looks_offline() {
            let ping_timeout = config.probe_timeout.min(config.fast_path_timeout);
            if !self.engine.remote().ping(ping_timeout) {
                debug!(table = operation.table(), "backend unreachable, skipping fast path");
                let cause = RemoteError::connect("connectivity probe failed");
                return self.enqueue(operation, Some(cause.to_string()));
            }
        }

        let budget = config.fast_path_timeout.saturating_sub(started.elapsed());
        if budget.is_zero() {
            return self.enqueue(operation, Some(RemoteError::timeout().to_string()));
        }

        let outcome = self.engine.remote().execute(&operation, budget);
        self.note_outcome(&outcome);

        match outcome {
            Ok(()) => {
                debug!(table = operation.table(), op = %operation.kind(), "write synced");
                Ok(WriteOutcome::synced())
            }
            Err(err) if err.is_transient() => self.enqueue(operation, Some(err.to_string())),
            Err(err) => {
                warn!(
                    table = operation.table(),
                    op = %operation.kind(),
                    error = %err,
                    "write rejected by remote store"
                );
                Err(SyncError::Rejected(err))
            }
        }
    }

    /// Upserts `rows` into `table`, queueing on transient failure.
    ///
    /// # Errors
    ///
    /// See [`write_with_queue`](Self::write_with_queue).
    pub fn upsert_with_queue(
        &self,
        table: &str,
        rows: Vec<Row>,
        on_conflict: &str,
    ) -> SyncResult<WriteOutcome> {
        self.write_with_queue(WriteOperation::upsert(table, rows, on_conflict))
    }

    /// Sets `patch` on the rows of `table` matching `filter`, queueing on
    /// transient failure.
    ///
    /// # Errors
    ///
    /// See [`write_with_queue`](Self::write_with_queue).
    pub fn patch_with_queue(&self, table: &str, filter: Row, patch: Row) -> SyncResult<WriteOutcome> {
        self.write_with_queue(WriteOperation::patch(table, filter, patch))
    }

    /// Queues an upsert without trying the remote store.
    ///
    /// Never fails visibly: if the outbox cannot persist the entry the write
    /// is dropped with a warning and `None` is returned.
    pub fn enqueue_upsert(&self, table: &str, rows: Vec<Row>, on_conflict: &str) -> Option<EntryId> {
        let operation = WriteOperation::upsert(table, rows, on_conflict);
        match self.engine.store().enqueue(operation, self.engine.now(), None) {
            Ok(entry) => {
                debug!(entry_id = %entry.id, table, "write enqueued");
                Some(entry.id)
            }
            Err(e) => {
                warn!(table, error = %e, "dropping write, outbox unavailable");
                None
            }
        }
    }

    /// Upserts `rows` into `table` without queueing.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` for permanent failures and `Unavailable` for
    /// transient ones.
    pub fn upsert(&self, table: &str, rows: Vec<Row>, on_conflict: &str) -> SyncResult<()> {
        let operation = WriteOperation::upsert(table, rows, on_conflict);
        let outcome = self
            .engine
            .remote()
            .execute(&operation, self.engine.config().delivery_timeout);
        self.note_outcome(&outcome);
        outcome.map_err(SyncError::from)
    }

    /// Returns pending and failed counts.
    pub fn queue_stats(&self) -> QueueStats {
        self.engine.store().stats()
    }

    /// Returns up to `limit` pending entries in queue order.
    pub fn queue_snapshot(&self, limit: usize) -> Vec<QueueSnapshot> {
        self.engine.store().queue_snapshot(limit)
    }

    /// Returns up to `limit` failed entries, oldest failure first.
    pub fn failed_snapshot(&self, limit: usize) -> Vec<FailedSnapshot> {
        self.engine.store().failed_snapshot(limit)
    }

    /// Returns delivery statistics of the engine.
    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Re-admits all failed writes and triggers a delivery pass.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the change could not be persisted.
    pub fn retry_all_queued_writes(&self) -> SyncResult<usize> {
        self.engine.retry_all_queued_writes()
    }

    /// Drops all failed writes.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the change could not be persisted.
    pub fn discard_failed(&self) -> SyncResult<usize> {
        self.engine.discard_failed()
    }

    /// Stops the background worker.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

impl<R: RemoteStore + ConnectivityProbe + 'static> std::fmt::Debug for SyncClient<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("engine", &self.engine)
            .field("offline_hint", &self.looks_offline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::MockRemote;
    use outbox_store::Timestamp;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn client() -> (Arc<MockRemote>, SyncClient<MockRemote>) {
        let remote = Arc::new(MockRemote::new());
        let store = Arc::new(OutboxStore::open_in_memory().unwrap());
        let client = SyncClient::with_clock(
            SyncConfig::new("unused").with_worker(false),
            remote.clone(),
            store,
            Arc::new(ManualClock::new(Timestamp::from_millis(1_000))),
        )
        .unwrap();
        (remote, client)
    }

    #[test]
    fn synced_when_remote_accepts() {
        let (remote, client) = client();
        let outcome = client
            .upsert_with_queue("empresas", vec![row(json!({"id": 1}))], "id")
            .unwrap();
        assert_eq!(outcome.status, WriteStatus::Synced);
        assert_eq!(remote.executed().len(), 1);
        assert_eq!(client.queue_stats(), QueueStats::default());
    }

    #[test]
    fn queued_on_transient_failure() {
        let (remote, client) = client();
        remote.push_outcome(Err(RemoteError::Timeout));

        let outcome = client
            .patch_with_queue("empresas", row(json!({"id": 1})), row(json!({"estado": "x"})))
            .unwrap();
        assert!(outcome.is_queued());
        assert!(client.looks_offline());

        let snapshot = client.queue_snapshot(10);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(Some(snapshot[0].id), outcome.entry_id);
        assert_eq!(snapshot[0].attempts, 0);
        assert_eq!(snapshot[0].last_error.as_deref(), Some("request timed out"));
    }

    #[test]
    fn rejected_writes_are_not_queued() {
        let (remote, client) = client();
        remote.push_outcome(Err(RemoteError::from_status(400, "bad")));

        let err = client
            .upsert_with_queue("empresas", vec![row(json!({"id": 1}))], "id")
            .unwrap_err();
        assert!(matches!(err, SyncError::Rejected(_)));
        assert_eq!(client.queue_stats(), QueueStats::default());
    }

    #[test]
    fn unreachable_backend_skips_fast_path() {
        let (remote, client) = client();
        remote.set_connected(false);

        client
            .upsert_with_queue("empresas", vec![row(json!({"id": 1}))], "id")
            .unwrap();
        client
            .upsert_with_queue("usuarios", vec![row(json!({"id": 2}))], "id")
            .unwrap();

        // Only the first write reached the remote store.
        assert_eq!(remote.executed().len(), 1);
        assert_eq!(client.queue_stats().pending, 2);
        let snapshot = client.queue_snapshot(10);
        assert_eq!(
            snapshot[1].last_error.as_deref(),
            Some("connection failed: connectivity probe failed")
        );

        remote.set_connected(true);
        let outcome = client
            .upsert_with_queue("sesiones", vec![row(json!({"id": 3}))], "id")
            .unwrap();
        assert_eq!(outcome.status, WriteStatus::Synced);
        assert!(!client.looks_offline());
    }

    #[test]
    fn writes_queue_behind_earlier_writes_to_the_same_table() {
        let (remote, client) = client();
        remote.push_outcome(Err(RemoteError::Timeout));
        client
            .upsert_with_queue("empresas", vec![row(json!({"id": 1}))], "id")
            .unwrap();

        let outcome = client
            .upsert_with_queue("empresas", vec![row(json!({"id": 1}))], "id")
            .unwrap();
        assert!(outcome.is_queued());
        assert_eq!(remote.executed().len(), 1);

        let snapshot = client.queue_snapshot(10);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].id, outcome.entry_id.unwrap());
        assert_eq!(snapshot[1].last_error, None);

        // Other tables still take the fast path.
        let other = client
            .upsert_with_queue("usuarios", vec![row(json!({"id": 9}))], "id")
            .unwrap();
        assert_eq!(other.status, WriteStatus::Synced);
    }

    #[test]
    fn enqueue_upsert_skips_remote() {
        let (remote, client) = client();
        let id = client.enqueue_upsert("telemetria", vec![row(json!({"k": "v"}))], "k");
        assert!(id.is_some());
        assert!(remote.executed().is_empty());
        assert_eq!(client.queue_stats().pending, 1);
    }

    #[test]
    fn upsert_surfaces_every_error() {
        let (remote, client) = client();
        remote.push_outcome(Err(RemoteError::from_status(503, "")));
        let err = client
            .upsert("empresas", vec![row(json!({"id": 1}))], "id")
            .unwrap_err();
        assert!(matches!(err, SyncError::Unavailable(_)));
        assert_eq!(client.queue_stats().pending, 0);

        client
            .upsert("empresas", vec![row(json!({"id": 1}))], "id")
            .unwrap();
    }

    #[test]
    fn outcome_serialization() {
        let synced = serde_json::to_value(WriteOutcome::synced()).unwrap();
        assert_eq!(synced, json!({"status": "synced"}));

        let id = EntryId::new();
        let queued = serde_json::to_value(WriteOutcome::queued(id)).unwrap();
        assert_eq!(queued["status"], "queued");
        assert_eq!(queued["entry_id"], id.to_string());
    }
}
