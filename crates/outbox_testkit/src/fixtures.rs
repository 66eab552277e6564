//! Test fixtures and client helpers.
//!
//! Provides a client wired to a [`FakeBackend`], a manual clock and a
//! file-backed outbox in a temporary directory.

use crate::fake::FakeBackend;
use outbox_engine::{ManualClock, RetryConfig, SyncClient, SyncConfig};
use outbox_store::{OutboxStore, Row, StoreConfig, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Start time of every [`TestOutbox`] clock.
pub const TEST_EPOCH: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// Builds a row from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("row must be a JSON object, got {other}"),
    }
}

/// Retry settings for tests: deterministic delays of 1 s, 2 s, 4 s, capped
/// at 8 s, giving up after 4 attempts.
pub fn test_retry() -> RetryConfig {
    RetryConfig::new(4)
        .with_initial_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(8))
        .with_jitter(false)
}

/// Sync settings for tests: no worker, no jitter, short timeouts.
pub fn test_config(store_path: impl Into<PathBuf>) -> SyncConfig {
    SyncConfig::new(store_path)
        .with_retry(test_retry())
        .with_fast_path_timeout(Duration::from_millis(300))
        .with_delivery_timeout(Duration::from_millis(300))
        .with_probe_timeout(Duration::from_millis(100))
        .with_tick_interval(Duration::from_millis(20))
        .with_worker(false)
}

/// A client over a fake backend and an on-disk outbox that is removed on
/// drop.
pub struct TestOutbox {
    /// The fake backend.
    pub backend: Arc<FakeBackend>,
    /// The clock driving due times.
    pub clock: Arc<ManualClock>,
    config: SyncConfig,
    client: Option<SyncClient<FakeBackend>>,
    temp_dir: TempDir,
}

impl TestOutbox {
    /// Creates a test outbox with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a test outbox, letting `customize` adjust [`test_config`].
    pub fn with_config(customize: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = customize(test_config(temp_dir.path().join("outbox")));
        let mut outbox = Self {
            backend: Arc::new(FakeBackend::new()),
            clock: Arc::new(ManualClock::new(TEST_EPOCH)),
            config,
            client: None,
            temp_dir,
        };
        outbox.open();
        outbox
    }

    fn open(&mut self) {
        let store = OutboxStore::open_file(&StoreConfig::new(&self.config.store_path))
            .expect("Failed to open outbox store");
        let client = SyncClient::with_clock(
            self.config.clone(),
            self.backend.clone(),
            Arc::new(store),
            self.clock.clone(),
        )
        .expect("Failed to create client");
        self.client = Some(client);
    }

    /// Returns the client.
    pub fn client(&self) -> &SyncClient<FakeBackend> {
        self.client.as_ref().expect("client is open")
    }

    /// Simulates a process restart: the client is dropped, releasing the
    /// store lock, and a new one is opened over the same directory.
    pub fn restart(&mut self) {
        self.client = None;
        self.open();
    }

    /// Returns the outbox directory.
    pub fn store_path(&self) -> &Path {
        &self.config.store_path
    }

    /// Returns the temporary root directory.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Advances the clock by `by` and runs one drain pass.
    pub fn advance_and_tick(&self, by: Duration) -> outbox_engine::TickReport {
        self.clock.advance(by);
        self.client().engine().tick()
    }
}

impl Default for TestOutbox {
    fn default() -> Self {
        Self::new()
    }
}
