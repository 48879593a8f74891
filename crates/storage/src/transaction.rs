//! Optimistic transactions over watched keys.
//!
//! A [`Transaction`] is started with
//! [`StorageBackend::watch`](crate::StorageBackend::watch). Reads made through
//! the transaction observe the live store; the write set is supplied as a
//! [`Batch`] to [`commit`](Transaction::commit), which applies it atomically
//! only if none of the watched keys changed in the meantime.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use distbreaker_storage::{Batch, MemoryBackend, StorageBackend, StorageError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! let ttl = Duration::from_secs(60);
//!
//! let txn = backend.watch(&["owner"]).await.unwrap();
//! assert_eq!(txn.get("owner").await.unwrap(), None);
//!
//! // A concurrent writer touches the watched key...
//! backend.set_with_ttl("owner", Bytes::from("someone-else"), ttl).await.unwrap();
//!
//! // ...so the commit is rejected and nothing is applied.
//! let mut batch = Batch::new();
//! batch.set_with_ttl("owner", "me", ttl);
//! assert!(matches!(txn.commit(batch).await, Err(StorageError::Conflict)));
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    batch::{Batch, Reply},
    error::StorageResult,
};

/// Handle for one optimistic transaction.
///
/// # Concurrency
///
/// Two transactions watching the same key may both be open at once; the
/// first to commit wins and the other fails with
/// [`StorageError::Conflict`](crate::StorageError::Conflict). Modifications
/// made outside any transaction, including expiry of a watched key, also
/// invalidate the watch.
///
/// Dropping a transaction without committing releases the watch.
#[async_trait]
pub trait Transaction: Send {
    /// Reads a string value while the watch is held.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists
    /// - `Ok(None)` if the key doesn't exist or has expired
    /// - `Err(...)` on storage errors
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Applies `batch` atomically if no watched key changed since the watch
    /// began.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if a watched key was modified;
    ///   nothing in `batch` is applied
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    ///
    /// # Consumes
    ///
    /// The transaction cannot be used after commit, successful or not.
    async fn commit(self: Box<Self>, batch: Batch) -> StorageResult<Vec<Reply>>;
}
