//! # Outbox Testkit
//!
//! Test utilities for the outbox sync layer.
//!
//! This crate provides:
//! - [`FakeBackend`], a stateful in-process stand-in for the REST backend
//! - Fixtures for clients over a temporary on-disk outbox
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use outbox_testkit::prelude::*;
//!
//! #[test]
//! fn queued_while_offline() {
//!     let mut outbox = TestOutbox::new();
//!     outbox.backend.set_mode(FakeMode::Offline);
//!     let outcome = outbox.client().upsert_with_queue("empresas", vec![row(json!({"id": 1}))], "id");
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use serde_json::json;
}

pub use fake::*;
pub use fixtures::*;
pub use generators::*;
