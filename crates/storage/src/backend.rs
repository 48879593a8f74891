//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the only handle the breaker has on shared state. It
//! exposes exactly the primitives a Redis-like store offers: string values
//! with expiry, sorted sets scored by integers, atomic batches, and
//! optimistic transactions over watched keys.
//!
//! # Implementing a Backend
//!
//! 1. Implement [`execute`](StorageBackend::execute) so that every command of a [`Batch`] is
//!    applied as one atomic unit
//! 2. Implement a corresponding [`Transaction`] type returned by
//!    [`watch`](StorageBackend::watch)
//! 3. Map backend-specific errors to [`StorageError`]
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation
//! and the `conformance` module (feature `testutil`) for the contract checks
//! every backend is expected to pass.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    batch::{Batch, Reply},
    error::{StorageError, StorageResult},
    transaction::Transaction,
};

/// Abstract shared key-value store.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and shared by
/// every breaker instance in the process. No caller owns any key; mutual
/// exclusion is achieved only through [`watch`](StorageBackend::watch).
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`execute`](StorageBackend::execute) | Apply a batch of commands atomically |
/// | [`watch`](StorageBackend::watch) | Begin an optimistic transaction |
/// | [`get`](StorageBackend::get) | Read a string value |
/// | [`set_with_ttl`](StorageBackend::set_with_ttl) | Write a string value with expiry |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`zcard`](StorageBackend::zcard) | Count sorted-set members |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use distbreaker_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set_with_ttl("key", Bytes::from("value"), Duration::from_secs(60)).await.unwrap();
/// let value = backend.get("key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Applies every command of `batch` as one atomic unit and returns one
    /// [`Reply`] per command, in order.
    ///
    /// Other clients never observe a state in which only part of the batch
    /// has been applied. If a command fails (for example with
    /// [`StorageError::WrongType`]) the commands before it remain applied,
    /// matching the semantics of Redis `EXEC`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn execute(&self, batch: Batch) -> StorageResult<Vec<Reply>>;

    /// Begins an optimistic transaction watching `keys`.
    ///
    /// The returned [`Transaction`] commits only if none of `keys` was
    /// modified between this call and [`Transaction::commit`].
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn watch(&self, keys: &[&str]) -> StorageResult<Box<dyn Transaction>>;

    /// Verifies the backend can serve requests.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;

    /// Reads a string value.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists
    /// - `Ok(None)` if the key doesn't exist or has expired
    /// - `Err(...)` on storage errors
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let mut batch = Batch::new();
        batch.get(key);
        single_reply(self.execute(batch).await?)?.into_value()
    }

    /// Stores a string value that expires after `ttl`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> StorageResult<()> {
        let mut batch = Batch::new();
        batch.set_with_ttl(key, value, ttl);
        self.execute(batch).await.map(|_| ())
    }

    /// Removes a key of any type. Removing an absent key is a no-op.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut batch = Batch::new();
        batch.delete(key);
        self.execute(batch).await.map(|_| ())
    }

    /// Counts the members of a sorted set; an absent key counts as empty.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn zcard(&self, key: &str) -> StorageResult<u64> {
        let mut batch = Batch::new();
        batch.zcard(key);
        let count = single_reply(self.execute(batch).await?)?.into_integer()?;
        u64::try_from(count)
            .map_err(|_| StorageError::serialization(format!("negative cardinality {count}")))
    }
}

fn single_reply(replies: Vec<Reply>) -> StorageResult<Reply> {
    let count = replies.len();
    let mut replies = replies.into_iter();
    match (replies.next(), replies.next()) {
        (Some(reply), None) => Ok(reply),
        _ => Err(StorageError::serialization(format!("expected one reply, got {count}"))),
    }
}
