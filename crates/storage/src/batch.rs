//! Store primitives and the batches that carry them.
//!
//! A [`Batch`] is an ordered list of [`Command`]s that a backend applies as a
//! single atomic unit, either directly through
//! [`StorageBackend::execute`](crate::StorageBackend::execute) or as the write
//! set of an optimistic [`Transaction`](crate::Transaction).
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use distbreaker_storage::{Batch, MemoryBackend, Reply, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//!
//! let mut batch = Batch::new();
//! batch.zadd("events", 10, "a").zadd("events", 20, "b").zcard("events");
//! let replies = backend.execute(batch).await.unwrap();
//! assert_eq!(replies[2], Reply::Integer(2));
//!
//! let mut batch = Batch::new();
//! batch.zrem_range_by_score("events", 15).pexpire("events", Duration::from_secs(60));
//! backend.execute(batch).await.unwrap();
//! assert_eq!(backend.zcard("events").await.unwrap(), 1);
//! # });
//! ```

use std::time::Duration;

use bytes::Bytes;

use crate::error::{StorageError, StorageResult};

/// A single store primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reads a string value. Replies with [`Reply::Value`].
    Get {
        /// Key to read.
        key: String,
    },
    /// Writes a string value with an expiry. Replies with [`Reply::Ok`].
    SetWithTtl {
        /// Key to write.
        key: String,
        /// Value to store.
        value: Bytes,
        /// Time until the key expires.
        ttl: Duration,
    },
    /// Removes a key of any type. Replies with the number of keys removed.
    Delete {
        /// Key to remove.
        key: String,
    },
    /// Inserts `member` into the sorted set at `key` with `score`, updating
    /// the score of an existing member. Replies with the number of members
    /// added.
    ZAdd {
        /// Sorted-set key.
        key: String,
        /// Ordering score.
        score: i64,
        /// Member identity.
        member: String,
    },
    /// Removes `member` from the sorted set at `key`. Replies with the
    /// number of members removed.
    ZRem {
        /// Sorted-set key.
        key: String,
        /// Member identity.
        member: String,
    },
    /// Removes every member whose score is strictly below `below`. Replies
    /// with the number of members removed.
    ZRemRangeByScore {
        /// Sorted-set key.
        key: String,
        /// Exclusive upper bound.
        below: i64,
    },
    /// Counts the members of the sorted set at `key`.
    ZCard {
        /// Sorted-set key.
        key: String,
    },
    /// Resets the expiry of an existing key. Replies with `1` when the key
    /// exists and `0` otherwise.
    PExpire {
        /// Key to refresh.
        key: String,
        /// New time to live.
        ttl: Duration,
    },
}

impl Command {
    /// The key this command operates on.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key }
            | Self::SetWithTtl { key, .. }
            | Self::Delete { key }
            | Self::ZAdd { key, .. }
            | Self::ZRem { key, .. }
            | Self::ZRemRangeByScore { key, .. }
            | Self::ZCard { key }
            | Self::PExpire { key, .. } => key,
        }
    }

    /// Whether the command can modify the store.
    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get { .. } | Self::ZCard { .. })
    }
}

/// Result of a single [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledgement with no payload.
    Ok,
    /// Integer reply (counts, cardinalities, flags).
    Integer(i64),
    /// String value, `None` when the key is absent.
    Value(Option<Bytes>),
}

impl Reply {
    /// Interprets the reply as an integer.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] for any other reply shape.
    pub fn into_integer(self) -> StorageResult<i64> {
        match self {
            Self::Integer(n) => Ok(n),
            other => {
                Err(StorageError::serialization(format!("expected integer reply, got {other:?}")))
            },
        }
    }

    /// Interprets the reply as an optional string value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] for any other reply shape.
    pub fn into_value(self) -> StorageResult<Option<Bytes>> {
        match self {
            Self::Value(value) => Ok(value),
            other => {
                Err(StorageError::serialization(format!("expected value reply, got {other:?}")))
            },
        }
    }
}

/// Ordered list of commands applied atomically.
///
/// Builder methods return `&mut Self` so calls can be chained; the batch is
/// consumed by [`execute`](crate::StorageBackend::execute) or
/// [`commit`](crate::Transaction::commit).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an arbitrary command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Appends [`Command::Get`].
    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Get { key: key.into() })
    }

    /// Appends [`Command::SetWithTtl`].
    pub fn set_with_ttl(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        ttl: Duration,
    ) -> &mut Self {
        self.push(Command::SetWithTtl { key: key.into(), value: value.into(), ttl })
    }

    /// Appends [`Command::Delete`].
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Delete { key: key.into() })
    }

    /// Appends [`Command::ZAdd`].
    pub fn zadd(
        &mut self,
        key: impl Into<String>,
        score: i64,
        member: impl Into<String>,
    ) -> &mut Self {
        self.push(Command::ZAdd { key: key.into(), score, member: member.into() })
    }

    /// Appends [`Command::ZRem`].
    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::ZRem { key: key.into(), member: member.into() })
    }

    /// Appends [`Command::ZRemRangeByScore`].
    pub fn zrem_range_by_score(&mut self, key: impl Into<String>, below: i64) -> &mut Self {
        self.push(Command::ZRemRangeByScore { key: key.into(), below })
    }

    /// Appends [`Command::ZCard`].
    pub fn zcard(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::ZCard { key: key.into() })
    }

    /// Appends [`Command::PExpire`].
    pub fn pexpire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(Command::PExpire { key: key.into(), ttl })
    }

    /// Number of commands in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the batch holds no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Borrows the queued commands in order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consumes the batch, yielding its commands in order.
    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

impl FromIterator<Command> for Batch {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self { commands: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_order() {
        let mut batch = Batch::new();
        batch.get("a").zadd("b", 1, "m").delete("c");

        let keys: Vec<&str> = batch.commands().iter().map(Command::key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn read_commands_are_not_writes() {
        assert!(!Command::Get { key: "k".into() }.is_write());
        assert!(!Command::ZCard { key: "k".into() }.is_write());
        assert!(Command::Delete { key: "k".into() }.is_write());
        assert!(Command::PExpire { key: "k".into(), ttl: Duration::from_secs(1) }.is_write());
    }

    #[test]
    fn reply_conversions_reject_mismatched_shapes() {
        assert_eq!(Reply::Integer(4).into_integer().ok(), Some(4));
        assert!(Reply::Ok.into_integer().is_err());
        assert!(Reply::Integer(1).into_value().is_err());
        assert_eq!(Reply::Value(None).into_value().ok(), Some(None));
    }
}
