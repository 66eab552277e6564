//! # Outbox Store
//!
//! Durable storage for the outbox sync layer.
//!
//! This crate owns the data model of queued writes and the two stores they
//! move between:
//!
//! - the **queue**: writes waiting for (re)delivery, in enqueue order
//! - the **failed** set: writes that exhausted their retries or were
//!   rejected permanently by the backend
//!
//! ## Durability
//!
//! Every mutation is persisted through a [`StoreBackend`] before it becomes
//! visible in memory. If the durable write fails, the in-memory view is left
//! untouched and the caller gets an error, so the two never diverge.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral sessions
//! - [`FileBackend`] - Atomic write-then-rename file in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use outbox_store::{OutboxStore, Timestamp, WriteOperation};
//! use serde_json::json;
//!
//! let store = OutboxStore::open_in_memory().unwrap();
//! let row = json!({"id": 1, "estado": "Activa"}).as_object().cloned().unwrap();
//! let op = WriteOperation::upsert("empresas", vec![row], "id");
//!
//! let entry = store.enqueue(op, Timestamp::from_millis(1_000), None).unwrap();
//! assert_eq!(entry.attempts, 0);
//! assert_eq!(store.stats().pending, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod entry;
mod error;
mod file;
mod memory;
mod snapshot;
mod store;
mod types;

pub use backend::StoreBackend;
pub use entry::{FailedEntry, QueueEntry};
pub use error::{StoreError, StoreResult};
pub use file::{FileBackend, StoreConfig};
pub use memory::InMemoryBackend;
pub use snapshot::{FailedSnapshot, QueueSnapshot, QueueStats};
pub use store::{OutboxStore, STORE_FORMAT_VERSION};
pub use types::{EntryId, OperationKind, Row, Timestamp, WriteOperation};
