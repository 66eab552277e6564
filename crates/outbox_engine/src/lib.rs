//! # Outbox Engine
//!
//! Never-lose-a-write synchronization layer for a remote REST store.
//!
//! This crate provides:
//! - A write façade that tries a write immediately and falls back to a
//!   durable queue when the backend is unreachable
//! - A failure classifier separating transient from permanent errors
//! - A background engine that drains the queue with capped exponential
//!   backoff and parks hopeless writes in a failed set
//! - A connectivity probe used to skip doomed fast-path attempts
//! - Read-only stats and snapshots for monitoring UIs
//!
//! ## Architecture
//!
//! ```text
//! caller ──► SyncClient ──(fast path)──► RemoteStore ──► backend
//!                │ transient failure          ▲
//!                ▼                            │
//!           OutboxStore ◄──── SyncEngine ─────┘
//!         (queue | failed)   (worker thread)
//! ```
//!
//! ## Key Invariants
//!
//! - A write is either delivered, durably queued, or reported to the caller
//! - Transient errors never escape the queued write paths
//! - Permanent errors are never retried automatically
//! - Deliveries of the same entry never overlap
//! - A backing-off entry never delays other due entries

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod engine;
mod error;
mod facade;
mod http;
mod remote;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RemoteConfig, RetryConfig, SyncConfig};
pub use engine::{EngineStats, SyncEngine, TickReport};
pub use error::{ErrorClass, RemoteError, SyncError, SyncResult};
pub use facade::{SyncClient, WriteOutcome, WriteStatus};
pub use http::{HttpClient, HttpMethod, HttpRemoteStore, HttpRequest, HttpResponse, ReqwestClient};
pub use remote::{ConnectivityProbe, MockRemote, RemoteStore};

pub use outbox_store::{
    EntryId, FailedEntry, FailedSnapshot, OperationKind, OutboxStore, QueueEntry, QueueSnapshot,
    QueueStats, Row, StoreConfig, StoreError, Timestamp, WriteOperation,
};
