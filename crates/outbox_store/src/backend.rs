//! Storage backend trait definition.

use crate::error::StoreResult;

/// A durable home for the encoded outbox.
///
/// Backends are **opaque byte stores**: they hold exactly one blob, the most
/// recently persisted outbox image. The [`crate::OutboxStore`] owns encoding
/// and decoding; backends never interpret the bytes.
///
/// # Invariants
///
/// - `load` returns the bytes of the last successful `persist`, or `None`
///   if nothing was ever persisted
/// - `persist` replaces the stored image atomically: after a crash, `load`
///   returns either the old or the new image, never a mix
/// - When `persist` returns `Ok`, the new image survives process termination
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StoreBackend: Send + Sync {
    /// Loads the last persisted image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image exists but cannot be read.
    fn load(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Atomically replaces the persisted image with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image could not be made durable. In that case
    /// the previously persisted image is still the current one.
    fn persist(&mut self, data: &[u8]) -> StoreResult<()>;
}
