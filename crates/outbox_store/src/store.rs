//! The queue and failed stores behind one lock.

use crate::backend::StoreBackend;
use crate::entry::{FailedEntry, QueueEntry};
use crate::error::{StoreError, StoreResult};
use crate::file::{FileBackend, StoreConfig};
use crate::memory::InMemoryBackend;
use crate::snapshot::{FailedSnapshot, QueueSnapshot, QueueStats};
use crate::types::{EntryId, Timestamp, WriteOperation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Current persisted format version.
pub const STORE_FORMAT_VERSION: u16 = 1;

/// Persisted image of both stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OutboxImage {
    version: u16,
    queue: Vec<QueueEntry>,
    failed: Vec<FailedEntry>,
}

impl Default for OutboxImage {
    fn default() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            queue: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl OutboxImage {
    fn decode(data: &[u8]) -> StoreResult<Self> {
        let image: OutboxImage = serde_json::from_slice(data)?;
        if image.version > STORE_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: image.version,
                supported: STORE_FORMAT_VERSION,
            });
        }
        Ok(image)
    }

    fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn position(&self, id: EntryId) -> Option<usize> {
        self.queue.iter().position(|e| e.id == id)
    }
}

struct Inner {
    image: OutboxImage,
    backend: Box<dyn StoreBackend>,
}

/// Durable queue of pending writes plus the set of failed ones.
///
/// All mutations go through one mutex and are persisted inside the same
/// critical section: the new image is written to the backend first and only
/// then replaces the in-memory image. Readers therefore only ever observe
/// durable state.
///
/// Queue order is enqueue order. Rescheduling updates an entry in place, so
/// entries keep their position while their due time moves.
pub struct OutboxStore {
    inner: Mutex<Inner>,
}

impl OutboxStore {
    /// Opens a store over `backend`, loading any persisted image.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted image is unreadable or was written
    /// by a newer format.
    pub fn open(backend: Box<dyn StoreBackend>) -> StoreResult<Self> {
        let image = match backend.load()? {
            Some(data) => OutboxImage::decode(&data)?,
            None => OutboxImage::default(),
        };

        tracing::debug!(
            pending = image.queue.len(),
            failed = image.failed.len(),
            "opened outbox store"
        );

        Ok(Self {
            inner: Mutex::new(Inner { image, backend }),
        })
    }

    /// Opens a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be locked or the persisted
    /// image is unreadable.
    pub fn open_file(config: &StoreConfig) -> StoreResult<Self> {
        let backend = FileBackend::open(config)?;
        Self::open(Box::new(backend))
    }

    /// Opens an empty store kept only in memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other openers.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()))
    }

    /// Applies `f` to a copy of the image, persists it, then commits it.
    ///
    /// `f` reports whether it changed anything; unchanged images are not
    /// rewritten.
    fn mutate<T>(&self, f: impl FnOnce(&mut OutboxImage) -> (T, bool)) -> StoreResult<T> {
        let mut inner = self.inner.lock();
        let mut next = inner.image.clone();
        let (out, changed) = f(&mut next);
        if changed {
            let data = next.encode()?;
            inner.backend.persist(&data)?;
            inner.image = next;
        }
        Ok(out)
    }

    /// Appends a new entry that is due at `now`.
    ///
    /// The entry is durable once this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be persisted; it is then not
    /// queued.
    pub fn enqueue(
        &self,
        operation: WriteOperation,
        now: Timestamp,
        last_error: Option<String>,
    ) -> StoreResult<QueueEntry> {
        let mut entry = QueueEntry::new(operation, now);
        entry.last_error = last_error;
        self.mutate(|image| {
            image.queue.push(entry.clone());
            (entry, true)
        })
    }

    /// Returns the entries due at `now`, in enqueue order.
    ///
    /// Entries still backing off are skipped, not waited for.
    pub fn list_due(&self, now: Timestamp) -> Vec<QueueEntry> {
        self.inner
            .lock()
            .image
            .queue
            .iter()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect()
    }

    /// Removes a delivered entry. Returns false if it was not queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal could not be persisted.
    pub fn remove(&self, id: EntryId) -> StoreResult<bool> {
        self.mutate(|image| match image.position(id) {
            Some(pos) => {
                image.queue.remove(pos);
                (true, true)
            }
            None => (false, false),
        })
    }

    /// Records a failed attempt: bumps `attempts`, moves `next_try_at` and
    /// stores the error. Returns the updated entry, or `None` if it was not
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the update could not be persisted.
    pub fn reschedule(
        &self,
        id: EntryId,
        next_try_at: Timestamp,
        last_error: impl Into<String>,
    ) -> StoreResult<Option<QueueEntry>> {
        let last_error = last_error.into();
        self.mutate(|image| match image.position(id) {
            Some(pos) => {
                let entry = &mut image.queue[pos];
                entry.record_failure(next_try_at, last_error);
                (Some(entry.clone()), true)
            }
            None => (None, false),
        })
    }

    /// Moves an entry to the failed set, counting the attempt that failed.
    /// Returns the failed entry, or `None` if it was not queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the move could not be persisted; the entry then
    /// stays queued.
    pub fn move_to_failed(
        &self,
        id: EntryId,
        error: impl Into<String>,
        failed_at: Timestamp,
    ) -> StoreResult<Option<FailedEntry>> {
        let error = error.into();
        self.mutate(|image| match image.position(id) {
            Some(pos) => {
                let failed = image.queue.remove(pos).into_failed(error, failed_at);
                image.failed.push(failed.clone());
                (Some(failed), true)
            }
            None => (None, false),
        })
    }

    /// Re-admits every failed entry with a fresh retry budget and makes every
    /// pending entry due at `now`.
    ///
    /// Re-admitted entries go to the back of the queue in the order they
    /// failed. Returns how many failed entries were re-admitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the bulk move could not be persisted; nothing
    /// moves in that case.
    pub fn retry_all(&self, now: Timestamp) -> StoreResult<usize> {
        self.mutate(|image| {
            let mut changed = false;
            for entry in &mut image.queue {
                if entry.next_try_at > now {
                    entry.next_try_at = now.max(entry.enqueued_at);
                    changed = true;
                }
            }

            let readmitted = image.failed.len();
            for failed in std::mem::take(&mut image.failed) {
                image.queue.push(failed.into_queued(now));
            }

            (readmitted, changed || readmitted > 0)
        })
    }

    /// Drops every failed entry. Returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the change could not be persisted.
    pub fn discard_failed(&self) -> StoreResult<usize> {
        self.mutate(|image| {
            let count = image.failed.len();
            image.failed.clear();
            (count, count > 0)
        })
    }

    /// Returns a queued entry by id.
    #[must_use]
    pub fn get(&self, id: EntryId) -> Option<QueueEntry> {
        let inner = self.inner.lock();
        inner.image.position(id).map(|pos| inner.image.queue[pos].clone())
    }

    /// Returns a failed entry by id.
    #[must_use]
    pub fn get_failed(&self, id: EntryId) -> Option<FailedEntry> {
        self.inner
            .lock()
            .image
            .failed
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Returns all pending entries in queue order.
    #[must_use]
    pub fn pending_entries(&self) -> Vec<QueueEntry> {
        self.inner.lock().image.queue.clone()
    }

    /// Returns all failed entries in the order they failed.
    #[must_use]
    pub fn failed_entries(&self) -> Vec<FailedEntry> {
        self.inner.lock().image.failed.clone()
    }

    /// Returns true if a pending entry writes to `table`.
    #[must_use]
    pub fn has_pending_for(&self, table: &str) -> bool {
        self.inner
            .lock()
            .image
            .queue
            .iter()
            .any(|e| e.operation.table() == table)
    }

    /// Returns the earliest due time among pending entries.
    #[must_use]
    pub fn next_due(&self) -> Option<Timestamp> {
        self.inner
            .lock()
            .image
            .queue
            .iter()
            .map(|e| e.next_try_at)
            .min()
    }

    /// Returns pending and failed counts from one consistent view.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            pending: inner.image.queue.len(),
            failed: inner.image.failed.len(),
        }
    }

    /// Returns up to `limit` pending entries in queue order.
    #[must_use]
    pub fn queue_snapshot(&self, limit: usize) -> Vec<QueueSnapshot> {
        self.inner
            .lock()
            .image
            .queue
            .iter()
            .take(limit)
            .map(QueueSnapshot::from)
            .collect()
    }

    /// Returns up to `limit` failed entries, oldest failure first.
    #[must_use]
    pub fn failed_snapshot(&self, limit: usize) -> Vec<FailedSnapshot> {
        self.inner
            .lock()
            .image
            .failed
            .iter()
            .take(limit)
            .map(FailedSnapshot::from)
            .collect()
    }
}

impl std::fmt::Debug for OutboxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("OutboxStore")
            .field("pending", &stats.pending)
            .field("failed", &stats.failed)
            .finish()
    }
}
