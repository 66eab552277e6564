//! Background delivery of queued writes.

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use outbox_store::{OutboxStore, QueueEntry, StoreError, Timestamp};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Name of the worker thread.
const WORKER_THREAD_NAME: &str = "outbox-sync";

/// Statistics about delivery since the engine was created.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Drain passes completed.
    pub ticks: u64,
    /// Entries delivered and removed.
    pub delivered: u64,
    /// Entries rescheduled after a transient failure.
    pub retried: u64,
    /// Entries moved to the failed store.
    pub failed: u64,
    /// When the last drain pass started.
    pub last_tick_at: Option<Timestamp>,
    /// Last delivery or persistence error.
    pub last_error: Option<String>,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Entries delivered and removed.
    pub delivered: usize,
    /// Entries left queued with a later due time.
    pub rescheduled: usize,
    /// Entries moved to the failed store.
    pub failed: usize,
}

impl TickReport {
    /// Returns true if the pass touched no entry.
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.rescheduled == 0 && self.failed == 0
    }
}

#[derive(Debug, Default)]
struct Signal {
    wake: bool,
    shutdown: bool,
}

struct Shared<R> {
    config: SyncConfig,
    remote: Arc<R>,
    store: Arc<OutboxStore>,
    clock: Arc<dyn Clock>,
    signal: Mutex<Signal>,
    wakeup: Condvar,
    stats: RwLock<EngineStats>,
    /// Held for a whole drain pass so passes never overlap.
    delivery: Mutex<()>,
}

impl<R: RemoteStore> Shared<R> {
    fn stop_requested(&self) -> bool {
        self.signal.lock().shutdown
    }

    fn record_error(&self, message: String) {
        self.stats.write().last_error = Some(message);
    }

    /// Delivers every due entry in queue order.
    ///
    /// `stop` is checked between entries; an attempt in flight always
    /// finishes and is recorded first.
    fn drain(&self, stop: &dyn Fn() -> bool) -> TickReport {
        let _pass = self.delivery.lock();
        let started = self.clock.now();
        let due = self.store.list_due(started);
        let mut report = TickReport::default();

        debug!(due = due.len(), "drain pass");

        for entry in due {
            if stop() {
                debug!("drain pass interrupted by shutdown");
                break;
            }
            if let Err(e) = self.deliver(&entry, &mut report) {
                error!(entry_id = %entry.id, error = %e, "failed to persist delivery outcome");
                self.record_error(e.to_string());
            }
        }

        let mut stats = self.stats.write();
        stats.ticks += 1;
        stats.last_tick_at = Some(started);
        stats.delivered += report.delivered as u64;
        stats.retried += report.rescheduled as u64;
        stats.failed += report.failed as u64;
        report
    }

    fn deliver(&self, entry: &QueueEntry, report: &mut TickReport) -> Result<(), StoreError> {
        let op = &entry.operation;
        let outcome = self.remote.execute(op, self.config.delivery_timeout);
        let now = self.clock.now();

        let err = match outcome {
            Ok(()) => {
                self.store.remove(entry.id)?;
                report.delivered += 1;
                info!(
                    entry_id = %entry.id,
                    table = op.table(),
                    op = %op.kind(),
                    attempts = entry.attempts,
                    "delivered queued write"
                );
                return Ok(());
            }
            Err(err) => err,
        };

        self.record_error(err.to_string());
        let attempts = entry.attempts.saturating_add(1);

        if !err.is_transient() {
            self.store.move_to_failed(entry.id, err.to_string(), now)?;
            report.failed += 1;
            error!(
                entry_id = %entry.id,
                table = op.table(),
                op = %op.kind(),
                error = %err,
                "write rejected by remote store, moved to failed"
            );
        } else if self.config.retry.is_exhausted(attempts) {
            self.store.move_to_failed(entry.id, err.to_string(), now)?;
            report.failed += 1;
            error!(
                entry_id = %entry.id,
                table = op.table(),
                op = %op.kind(),
                attempts,
                error = %err,
                "retries exhausted, moved to failed"
            );
        } else {
            let delay = self.config.retry.delay_for_attempt(attempts);
            self.store
                .reschedule(entry.id, now.saturating_add(delay), err.to_string())?;
            report.rescheduled += 1;
            warn!(
                entry_id = %entry.id,
                table = op.table(),
                attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "delivery failed, rescheduled"
            );
        }
        Ok(())
    }

    fn run(self: Arc<Self>) {
        let tick_ms = u64::try_from(self.config.tick_interval.as_millis()).unwrap_or(u64::MAX);
        info!(tick_ms, "sync worker started");
        loop {
            self.drain(&|| self.stop_requested());

            let mut signal = self.signal.lock();
            if !signal.wake && !signal.shutdown {
                self.wakeup.wait_for(&mut signal, self.config.tick_interval);
            }
            if signal.shutdown {
                break;
            }
            signal.wake = false;
        }
        info!("sync worker stopped");
    }
}

/// Drains the outbox into the remote store.
///
/// The engine owns the delivery side of the outbox: it is the only component
/// that removes, reschedules or fails entries. Passes run either on the
/// background worker started by [`SyncEngine::start`] or synchronously via
/// [`SyncEngine::tick`]; they never overlap.
pub struct SyncEngine<R: RemoteStore + 'static> {
    shared: Arc<Shared<R>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteStore + 'static> SyncEngine<R> {
    /// Creates an engine. The worker is not started.
    pub fn new(
        config: SyncConfig,
        remote: Arc<R>,
        store: Arc<OutboxStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                remote,
                store,
                clock,
                signal: Mutex::new(Signal::default()),
                wakeup: Condvar::new(),
                stats: RwLock::new(EngineStats::default()),
                delivery: Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Returns the outbox store.
    pub fn store(&self) -> &Arc<OutboxStore> {
        &self.shared.store
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.shared.remote
    }

    /// Returns the current time of the engine's clock.
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.shared.stats.read().clone()
    }

    /// Returns true while the background worker runs.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Runs one drain pass on the calling thread.
    ///
    /// Waits for a pass already running on the worker to finish first.
    pub fn tick(&self) -> TickReport {
        self.shared.drain(&|| false)
    }

    /// Starts the background worker. Does nothing if it already runs.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the thread could not be created.
    pub fn start(&self) -> SyncResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        *self.shared.signal.lock() = Signal::default();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || shared.run())
            .map_err(SyncError::Spawn)?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stops the background worker and waits for it to exit.
    ///
    /// A delivery in flight finishes and is recorded before the worker
    /// exits. Calling this when no worker runs is a no-op.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        {
            let mut signal = self.shared.signal.lock();
            signal.shutdown = true;
            self.shared.wakeup.notify_all();
        }

        if handle.join().is_err() {
            error!("sync worker panicked");
        }
    }

    /// Wakes the worker for an out-of-band pass.
    pub fn wake(&self) {
        let mut signal = self.shared.signal.lock();
        signal.wake = true;
        self.shared.wakeup.notify_all();
    }

    /// Re-admits every failed entry with a fresh retry budget, makes every
    /// pending entry due now and wakes the worker.
    ///
    /// Returns the number of re-admitted entries. Without a running worker
    /// the entries are delivered by the next [`tick`](Self::tick).
    ///
    /// # Errors
    ///
    /// Returns `Store` if the bulk move could not be persisted; nothing moves
    /// in that case.
    pub fn retry_all_queued_writes(&self) -> SyncResult<usize> {
        let count = self.shared.store.retry_all(self.now())?;
        info!(readmitted = count, "retrying all queued writes");
        self.wake();
        Ok(count)
    }

    /// Drops every failed entry. Returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the change could not be persisted.
    pub fn discard_failed(&self) -> SyncResult<usize> {
        let count = self.shared.store.discard_failed()?;
        if count > 0 {
            info!(discarded = count, "discarded failed writes");
        }
        Ok(count)
    }
}

impl<R: RemoteStore + 'static> Drop for SyncEngine<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<R: RemoteStore + 'static> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.shared.store)
            .field("running", &self.is_running())
            .finish()
    }
}
