//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryBackend`], an in-process implementation of
//! [`StorageBackend`] that behaves like a single Redis node. It lets the whole
//! breaker protocol run in tests without network I/O.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Typed values**: Strings and integer-scored sorted sets
//! - **TTL support**: Expired keys read as absent; a background task reclaims them
//! - **Optimistic transactions**: Every key carries a modification version; a commit fails if any
//!   watched version moved
//!
//! # Example
//!
//! ```
//! use distbreaker_storage::{Batch, MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     let mut batch = Batch::new();
//!     batch.zadd("requests", 1, "first").zadd("requests", 2, "second");
//!     backend.execute(batch).await.unwrap();
//!
//!     assert_eq!(backend.zcard("requests").await.unwrap(), 2);
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Key versions are kept for the lifetime of the backend, so memory grows with the number of
//!   distinct keys ever written

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::StorageBackend,
    batch::{Batch, Command, Reply},
    error::{StorageError, StorageResult},
    transaction::Transaction,
};

/// How often the background task reclaims expired keys.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Sending is a best-effort signal; the receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Clone)]
enum Value {
    String(Bytes),
    /// Member to score.
    SortedSet(BTreeMap<String, i64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// All keys plus the bookkeeping needed for `WATCH`.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    /// Last modification stamp per key. Entries survive deletion so that a
    /// delete followed by a re-create is still seen as a change.
    versions: HashMap<String, u64>,
    /// Monotonic source of modification stamps.
    clock: u64,
}

impl Keyspace {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_owned(), self.clock);
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Removes `key` if its TTL has elapsed. Expiry counts as a modification.
    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.entries.remove(key);
            self.touch(key);
        }
    }

    fn live(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.entries.get(key).filter(|entry| !entry.is_expired(now))
    }

    fn read_string(&self, key: &str, now: Instant) -> StorageResult<Option<Bytes>> {
        match self.live(key, now).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::String(bytes)) => Ok(Some(bytes.clone())),
            Some(Value::SortedSet(_)) => Err(StorageError::wrong_type(key)),
        }
    }

    fn sorted_set_mut(
        &mut self,
        key: &str,
        create: bool,
    ) -> StorageResult<Option<&mut BTreeMap<String, i64>>> {
        if create && !self.entries.contains_key(key) {
            self.entries.insert(
                key.to_owned(),
                Entry { value: Value::SortedSet(BTreeMap::new()), expires_at: None },
            );
        }
        match self.entries.get_mut(key).map(|entry| &mut entry.value) {
            None => Ok(None),
            Some(Value::SortedSet(set)) => Ok(Some(set)),
            Some(Value::String(_)) => Err(StorageError::wrong_type(key)),
        }
    }

    /// Drops a sorted set that became empty, as Redis does.
    fn drop_if_empty(&mut self, key: &str) {
        let empty = matches!(
            self.entries.get(key).map(|entry| &entry.value),
            Some(Value::SortedSet(set)) if set.is_empty()
        );
        if empty {
            self.entries.remove(key);
        }
    }

    fn apply(&mut self, command: Command, now: Instant) -> StorageResult<Reply> {
        self.purge_if_expired(command.key(), now);

        match command {
            Command::Get { key } => self.read_string(&key, now).map(Reply::Value),
            Command::SetWithTtl { key, value, ttl } => {
                let entry = Entry { value: Value::String(value), expires_at: Some(now + ttl) };
                self.entries.insert(key.clone(), entry);
                self.touch(&key);
                Ok(Reply::Ok)
            },
            Command::Delete { key } => {
                if self.entries.remove(&key).is_some() {
                    self.touch(&key);
                    Ok(Reply::Integer(1))
                } else {
                    Ok(Reply::Integer(0))
                }
            },
            Command::ZAdd { key, score, member } => {
                let Some(set) = self.sorted_set_mut(&key, true)? else {
                    return Err(StorageError::internal("sorted set vanished after creation"));
                };
                let previous = set.insert(member, score);
                if previous != Some(score) {
                    self.touch(&key);
                }
                Ok(Reply::Integer(i64::from(previous.is_none())))
            },
            Command::ZRem { key, member } => {
                let removed = match self.sorted_set_mut(&key, false)? {
                    Some(set) => set.remove(&member).is_some(),
                    None => false,
                };
                if removed {
                    self.drop_if_empty(&key);
                    self.touch(&key);
                }
                Ok(Reply::Integer(i64::from(removed)))
            },
            Command::ZRemRangeByScore { key, below } => {
                let removed = match self.sorted_set_mut(&key, false)? {
                    Some(set) => {
                        let before = set.len();
                        set.retain(|_, score| *score >= below);
                        before - set.len()
                    },
                    None => 0,
                };
                if removed > 0 {
                    self.drop_if_empty(&key);
                    self.touch(&key);
                }
                Ok(Reply::Integer(count(removed)))
            },
            Command::ZCard { key } => match self.live(&key, now).map(|entry| &entry.value) {
                None => Ok(Reply::Integer(0)),
                Some(Value::SortedSet(set)) => Ok(Reply::Integer(count(set.len()))),
                Some(Value::String(_)) => Err(StorageError::wrong_type(key)),
            },
            Command::PExpire { key, ttl } => match self.entries.get_mut(&key) {
                Some(entry) => {
                    entry.expires_at = Some(now + ttl);
                    self.touch(&key);
                    Ok(Reply::Integer(1))
                },
                None => Ok(Reply::Integer(0)),
            },
        }
    }

    fn apply_all(&mut self, batch: Batch, now: Instant) -> StorageResult<Vec<Reply>> {
        batch.into_commands().into_iter().map(|command| self.apply(command, now)).collect()
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// In-memory storage backend.
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same keyspace, which makes one instance a faithful stand-in for a store
/// shared by several processes: give each simulated process its own clone.
///
/// # Shutdown
///
/// The background TTL cleanup task stops automatically when all clones of
/// the `MemoryBackend` are dropped (via the internal `ShutdownGuard`).
/// You can also call [`shutdown`](Self::shutdown) to stop the task explicitly.
#[derive(Clone)]
pub struct MemoryBackend {
    keyspace: Arc<RwLock<Keyspace>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryBackend {
    /// Creates a new in-memory storage backend.
    ///
    /// This also spawns a background task that periodically reclaims expired
    /// keys, so it must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            keyspace: Arc::new(RwLock::new(Keyspace::default())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        let keyspace = Arc::clone(&backend.keyspace);
        tokio::spawn(async move {
            cleanup_expired_keys(keyspace, shutdown_rx).await;
        });

        backend
    }

    /// Explicitly signals the background TTL cleanup task to stop.
    ///
    /// Expired keys keep reading as absent after shutdown; they are simply no
    /// longer reclaimed in the background.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Number of physically stored keys, including expired keys not yet
    /// reclaimed.
    #[must_use]
    pub fn stored_key_count(&self) -> usize {
        self.keyspace.read().entries.len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("keys", &self.stored_key_count()).finish()
    }
}

/// Background task removing expired keys.
///
/// The task only holds a reference to the keyspace, not to a backend clone,
/// so it does not keep the shutdown guard alive.
async fn cleanup_expired_keys(
    keyspace: Arc<RwLock<Keyspace>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(CLEANUP_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Instant::now();
        let expired: Vec<String> = {
            let guard = keyspace.read();
            guard
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        if !expired.is_empty() {
            let mut guard = keyspace.write();
            for key in &expired {
                guard.purge_if_expired(key, now);
            }
            tracing::trace!(reclaimed = expired.len(), "reclaimed expired keys");
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip_all, fields(commands = batch.len()))]
    async fn execute(&self, batch: Batch) -> StorageResult<Vec<Reply>> {
        let now = Instant::now();
        self.keyspace.write().apply_all(batch, now)
    }

    #[tracing::instrument(skip(self))]
    async fn watch(&self, keys: &[&str]) -> StorageResult<Box<dyn Transaction>> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.write();
        let watched = keys
            .iter()
            .map(|key| {
                keyspace.purge_if_expired(key, now);
                ((*key).to_owned(), keyspace.version(key))
            })
            .collect();

        Ok(Box::new(MemoryTransaction { keyspace: Arc::clone(&self.keyspace), watched }))
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the read lock proves the keyspace is not deadlocked.
        let _unused = self.keyspace.read();
        Ok(())
    }
}

/// In-memory optimistic transaction.
///
/// Holds the version of every watched key as observed when the watch began.
struct MemoryTransaction {
    keyspace: Arc<RwLock<Keyspace>>,
    watched: Vec<(String, u64)>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        self.keyspace.read().read_string(key, Instant::now())
    }

    #[tracing::instrument(skip_all, fields(watched = self.watched.len(), commands = batch.len()))]
    async fn commit(self: Box<Self>, batch: Batch) -> StorageResult<Vec<Reply>> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.write();

        for (key, seen) in &self.watched {
            keyspace.purge_if_expired(key, now);
            if keyspace.version(key) != *seen {
                return Err(StorageError::Conflict);
            }
        }

        keyspace.apply_all(batch, now)
    }
}
