//! Remote store abstraction.

use crate::error::RemoteError;
use outbox_store::WriteOperation;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Executes writes against the remote store.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-memory fakes for testing, etc.).
///
/// Implementations must be idempotent: re-executing an operation after a
/// partial prior success must not duplicate rows.
pub trait RemoteStore: Send + Sync {
    /// Executes one operation, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a classified [`RemoteError`]; see [`RemoteError::class`].
    fn execute(&self, operation: &WriteOperation, timeout: Duration) -> Result<(), RemoteError>;
}

/// Cheap reachability check against the backend.
///
/// A `true` result is only a hint; the next write may still fail.
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true iff the backend answered within `timeout`. Never fails.
    fn ping(&self, timeout: Duration) -> bool;
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn execute(&self, operation: &WriteOperation, timeout: Duration) -> Result<(), RemoteError> {
        (**self).execute(operation, timeout)
    }
}

impl<T: ConnectivityProbe + ?Sized> ConnectivityProbe for Arc<T> {
    fn ping(&self, timeout: Duration) -> bool {
        (**self).ping(timeout)
    }
}

/// A scripted remote store for testing.
///
/// Each call pops the next scripted outcome; once the script is empty every
/// call succeeds. While disconnected, calls fail with a connection error
/// without consuming the script.
#[derive(Debug)]
pub struct MockRemote {
    connected: AtomicBool,
    outcomes: Mutex<VecDeque<Result<(), RemoteError>>>,
    executed: Mutex<Vec<WriteOperation>>,
}

impl MockRemote {
    /// Creates a connected mock that accepts everything.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            outcomes: Mutex::new(VecDeque::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Queues the outcome of a future call.
    pub fn push_outcome(&self, outcome: Result<(), RemoteError>) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every operation the mock was asked to execute.
    pub fn executed(&self) -> Vec<WriteOperation> {
        self.executed.lock().clone()
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MockRemote {
    fn execute(&self, operation: &WriteOperation, _timeout: Duration) -> Result<(), RemoteError> {
        self.executed.lock().push(operation.clone());
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::connect("mock remote disconnected"));
        }
        self.outcomes.lock().pop_front().unwrap_or(Ok(()))
    }
}

impl ConnectivityProbe for MockRemote {
    fn ping(&self, _timeout: Duration) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
