//! Redis storage backend implementation.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use distbreaker_storage::{
    Batch, Command, Reply, StorageBackend, StorageError, StorageResult, Transaction,
};
use redis::{Client, RedisResult, Value, aio::ConnectionManager};

use crate::{
    config::RedisBackendConfig,
    error::{redis_error_to_storage_error, value_to_reply},
    transaction::RedisTransaction,
};

/// Redis-backed store shared by every breaker pointing at the same server.
///
/// # Connections
///
/// Plain batches go through a [`ConnectionManager`], which multiplexes
/// requests and reconnects transparently. Each [`watch`](StorageBackend::watch)
/// opens its own connection because `WATCH` state is per connection and must
/// not be observed by unrelated callers.
///
/// # Cloning
///
/// Clones share the connection manager and are cheap.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    manager: ConnectionManager,
    timeout: Duration,
}

impl RedisBackend {
    /// Connects to the server described by `config`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Internal`] if the configuration or URL is invalid
    /// - [`StorageError::Connection`] or [`StorageError::Timeout`] if the server cannot be reached
    pub async fn new(config: RedisBackendConfig) -> StorageResult<Self> {
        config
            .validate()
            .map_err(|e| StorageError::internal_with_source("invalid Redis configuration", e))?;

        let client = Client::open(config.url()).map_err(redis_error_to_storage_error)?;
        let manager = bounded(config.timeout(), ConnectionManager::new(client.clone())).await?;

        tracing::info!(timeout = ?config.timeout(), "connected to Redis");
        Ok(Self { client, manager, timeout: config.timeout() })
    }

    /// Returns the per-round-trip timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("addr", &self.client.get_connection_info().addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    #[tracing::instrument(skip_all, fields(commands = batch.len()))]
    async fn execute(&self, batch: Batch) -> StorageResult<Vec<Reply>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let commands = batch.into_commands();
        let pipe = atomic_pipeline(&commands);
        let mut conn = self.manager.clone();
        let values: Vec<Value> = bounded(self.timeout, pipe.query_async(&mut conn)).await?;
        collect_replies(&commands, values)
    }

    #[tracing::instrument(skip(self))]
    async fn watch(&self, keys: &[&str]) -> StorageResult<Box<dyn Transaction>> {
        let mut conn =
            bounded(self.timeout, self.client.get_multiplexed_async_connection()).await?;

        let mut watch = redis::cmd("WATCH");
        for key in keys {
            watch.arg(*key);
        }
        let _: () = bounded(self.timeout, watch.query_async(&mut conn)).await?;

        Ok(Box::new(RedisTransaction::new(conn, self.timeout)))
    }

    async fn health_check(&self) -> StorageResult<()> {
        let mut conn = self.manager.clone();
        let ping = redis::cmd("PING");
        let pong: String = bounded(self.timeout, ping.query_async(&mut conn)).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StorageError::internal(format!("unexpected PING reply: {pong}")))
        }
    }
}

/// Runs one round trip under `timeout`, mapping failures to [`StorageError`].
pub(crate) async fn bounded<F, T>(timeout: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(redis_error_to_storage_error),
        Err(_) => {
            tracing::warn!(?timeout, "Redis round trip exceeded its deadline");
            Err(StorageError::timeout())
        },
    }
}

/// Translates commands into a `MULTI`/`EXEC` pipeline.
pub(crate) fn atomic_pipeline(commands: &[Command]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for command in commands {
        match command {
            Command::Get { key } => pipe.cmd("GET").arg(key),
            Command::SetWithTtl { key, value, ttl } => {
                pipe.cmd("PSETEX").arg(key).arg(millis(*ttl)).arg(value.as_ref())
            },
            Command::Delete { key } => pipe.cmd("DEL").arg(key),
            Command::ZAdd { key, score, member } => {
                pipe.cmd("ZADD").arg(key).arg(*score).arg(member)
            },
            Command::ZRem { key, member } => pipe.cmd("ZREM").arg(key).arg(member),
            Command::ZRemRangeByScore { key, below } => {
                pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg("-inf").arg(format!("({below}"))
            },
            Command::ZCard { key } => pipe.cmd("ZCARD").arg(key),
            Command::PExpire { key, ttl } => pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl)),
        };
    }
    pipe
}

/// Pairs each command with its `EXEC` reply.
pub(crate) fn collect_replies(
    commands: &[Command],
    values: Vec<Value>,
) -> StorageResult<Vec<Reply>> {
    if values.len() != commands.len() {
        return Err(StorageError::serialization(format!(
            "expected {} replies from EXEC, got {}",
            commands.len(),
            values.len()
        )));
    }
    commands.iter().zip(values).map(|(command, value)| value_to_reply(command, value)).collect()
}

/// Redis expiry arguments are whole milliseconds and must be positive.
fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
