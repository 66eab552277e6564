//! In-memory storage backend for testing.

use crate::backend::StoreBackend;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same buffer, so a test can keep one handle, hand another
/// to an [`crate::OutboxStore`], and later reopen a fresh store over the same
/// bytes to simulate a process restart.
///
/// # Example
///
/// ```rust
/// use outbox_store::{InMemoryBackend, StoreBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.persist(b"{}").unwrap();
/// assert_eq!(observer.data().as_deref(), Some(&b"{}"[..]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Option<Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding a previously persisted image.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(Some(data))),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a copy of the current image.
    #[must_use]
    pub fn data(&self) -> Option<Vec<u8>> {
        self.data.read().clone()
    }

    /// Makes every following `persist` fail with an I/O error.
    ///
    /// Used to exercise the durability barrier.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl StoreBackend for InMemoryBackend {
    fn load(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.data.read().clone())
    }

    fn persist(&mut self, data: &[u8]) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into());
        }
        *self.data.write() = Some(data.to_vec());
        Ok(())
    }
}
