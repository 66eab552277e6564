//! A stateful fake of the REST backend.
//!
//! Upserts merge rows on their conflict columns and patches update every
//! matching row, so repeated delivery of the same operation is observable
//! as a no-op, the way it is against a real database.

use outbox_engine::{ConnectivityProbe, RemoteError, RemoteStore};
use outbox_store::{Row, WriteOperation};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// How the fake answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    /// Applies writes.
    Online,
    /// Refuses connections.
    Offline,
    /// Answers every write with the given HTTP status.
    Reject(u16),
}

#[derive(Debug)]
struct FakeState {
    mode: FakeMode,
    tables: BTreeMap<String, Vec<Row>>,
    script: VecDeque<RemoteError>,
    latency: Duration,
    ping_latency: Duration,
    last_timeout: Option<Duration>,
    calls: usize,
    pings: usize,
}

/// In-process fake of a PostgREST-style backend.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    /// Creates an online, empty backend.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                mode: FakeMode::Online,
                tables: BTreeMap::new(),
                script: VecDeque::new(),
                latency: Duration::ZERO,
                ping_latency: Duration::ZERO,
                last_timeout: None,
                calls: 0,
                pings: 0,
            }),
        }
    }

    /// Creates an offline backend.
    pub fn offline() -> Self {
        let backend = Self::new();
        backend.set_mode(FakeMode::Offline);
        backend
    }

    /// Sets the answer mode.
    pub fn set_mode(&self, mode: FakeMode) {
        self.state.lock().mode = mode;
    }

    /// Makes the next `count` writes fail with `error`, ahead of the mode.
    pub fn fail_next(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.script.push_back(error.clone());
        }
    }

    /// Sets how long each request takes. Requests whose timeout is shorter
    /// wait out the timeout and fail with [`RemoteError::Timeout`].
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Sets how long a connectivity check takes. Checks whose timeout is
    /// shorter wait out the timeout and report the backend unreachable.
    pub fn set_ping_latency(&self, latency: Duration) {
        self.state.lock().ping_latency = latency;
    }

    /// Returns the timeout passed to the most recent write.
    pub fn last_timeout(&self) -> Option<Duration> {
        self.state.lock().last_timeout
    }

    /// Returns the rows currently stored in `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Returns how many writes were attempted, successful or not.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }

    /// Returns how many connectivity probes were made.
    pub fn ping_count(&self) -> usize {
        self.state.lock().pings
    }

    fn apply(tables: &mut BTreeMap<String, Vec<Row>>, operation: &WriteOperation) {
        match operation {
            WriteOperation::Upsert { table, rows, .. } => {
                let columns = operation.conflict_columns();
                let stored = tables.entry(table.clone()).or_default();
                for row in rows {
                    let existing = stored
                        .iter_mut()
                        .find(|s| columns.iter().all(|c| s.get(*c) == row.get(*c)));
                    match existing {
                        Some(target) => target.extend(row.clone()),
                        None => stored.push(row.clone()),
                    }
                }
            }
            WriteOperation::Patch {
                table,
                filter,
                patch,
            } => {
                if let Some(stored) = tables.get_mut(table) {
                    for target in stored
                        .iter_mut()
                        .filter(|s| filter.iter().all(|(k, v)| s.get(k) == Some(v)))
                    {
                        target.extend(patch.clone());
                    }
                }
            }
        }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for FakeBackend {
    fn execute(&self, operation: &WriteOperation, timeout: Duration) -> Result<(), RemoteError> {
        let latency = {
            let mut state = self.state.lock();
            state.calls += 1;
            state.last_timeout = Some(timeout);
            state.latency
        };

        if latency > timeout {
            std::thread::sleep(timeout);
            return Err(RemoteError::Timeout);
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = self.state.lock();
        if let Some(err) = state.script.pop_front() {
            return Err(err);
        }
        match state.mode {
            FakeMode::Offline => Err(RemoteError::connect("connection refused")),
            FakeMode::Reject(status) => Err(RemoteError::from_status(status, "rejected by fake")),
            FakeMode::Online => {
                Self::apply(&mut state.tables, operation);
                Ok(())
            }
        }
    }
}

impl ConnectivityProbe for FakeBackend {
    fn ping(&self, timeout: Duration) -> bool {
        let latency = {
            let mut state = self.state.lock();
            state.pings += 1;
            state.ping_latency
        };
        if !latency.is_zero() {
            std::thread::sleep(latency.min(timeout));
        }
        latency <= timeout && self.state.lock().mode != FakeMode::Offline
    }
}
