//! Shared key-value store abstraction for the distributed circuit breaker.
//!
//! This crate provides the [`StorageBackend`] trait and related types through
//! which breaker instances in different processes share state. Any store that
//! offers string values with expiry, integer-scored sorted sets, atomic
//! command batches and optimistic transactions over watched keys can back a
//! breaker.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 distbreaker                  │
//! │     (state machine, windows, transitions)    │
//! ├──────────────────────────────────────────────┤
//! │             distbreaker-storage              │
//! │   StorageBackend: execute / watch / health   │
//! ├──────────────────────┬───────────────────────┤
//! │    MemoryBackend     │     RedisBackend      │
//! │  (tests, one process)│ (distbreaker-storage- │
//! │                      │        redis)         │
//! └──────────────────────┴───────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use distbreaker_storage::{Batch, MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!     let ttl = Duration::from_secs(60);
//!
//!     // Plain commands
//!     backend.set_with_ttl("state", Bytes::from("closed 0"), ttl).await?;
//!
//!     // Optimistic transaction
//!     let txn = backend.watch(&["state"]).await?;
//!     let current = txn.get("state").await?;
//!     assert_eq!(current, Some(Bytes::from("closed 0")));
//!
//!     let mut batch = Batch::new();
//!     batch.set_with_ttl("state", "open 42", ttl);
//!     txn.commit(batch).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Available Backends
//!
//! | Backend | Use Case | Persistence |
//! |---------|----------|-------------|
//! | [`MemoryBackend`] | Testing, single process | No |
//! | `RedisBackend` (in `distbreaker-storage-redis`) | Production | Yes |
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`], which wraps potential
//! [`StorageError`] variants. Backends map their internal errors to these
//! standardized error types.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (member
//!   generator, assertion macros) and the `conformance` suite. Enable this in
//!   `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod batch;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;

// Re-export primary types at crate root for convenience
pub use backend::StorageBackend;
pub use batch::{Batch, Command, Reply};
pub use bytes::Bytes;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use transaction::Transaction;
