//! Optimistic transactions over `WATCH`/`MULTI`/`EXEC`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use distbreaker_storage::{Batch, Reply, StorageError, StorageResult, Transaction};
use redis::{Value, aio::MultiplexedConnection};

use crate::backend::{atomic_pipeline, bounded, collect_replies};

/// Transaction holding a dedicated connection with an active `WATCH`.
///
/// Dropping the transaction closes the connection, which releases the watch
/// on the server.
pub struct RedisTransaction {
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl RedisTransaction {
    pub(crate) fn new(conn: MultiplexedConnection, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

impl std::fmt::Debug for RedisTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransaction").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

#[async_trait]
impl Transaction for RedisTransaction {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        // Clones share the underlying connection, and with it the watch.
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        let value: Option<Vec<u8>> = bounded(self.timeout, cmd.query_async(&mut conn)).await?;
        Ok(value.map(Bytes::from))
    }

    #[tracing::instrument(skip_all, fields(commands = batch.len()))]
    async fn commit(self: Box<Self>, batch: Batch) -> StorageResult<Vec<Reply>> {
        let mut conn = self.conn.clone();
        let commands = batch.into_commands();

        // An empty pipeline is never sent, so an empty write set still needs an
        // explicit EXEC to learn whether the watch held.
        let exec: Option<Vec<Value>> = if commands.is_empty() {
            let multi = redis::cmd("MULTI");
            let _: () = bounded(self.timeout, multi.query_async(&mut conn)).await?;
            let exec = redis::cmd("EXEC");
            bounded(self.timeout, exec.query_async(&mut conn)).await?
        } else {
            let pipe = atomic_pipeline(&commands);
            bounded(self.timeout, pipe.query_async(&mut conn)).await?
        };

        match exec {
            Some(values) => collect_replies(&commands, values),
            None => {
                tracing::debug!("watched key changed, EXEC aborted");
                Err(StorageError::Conflict)
            },
        }
    }
}
