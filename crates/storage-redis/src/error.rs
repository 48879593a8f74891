//! Mapping from Redis client errors and replies to
//! [`StorageError`](distbreaker_storage::StorageError).

use bytes::Bytes;
use distbreaker_storage::{Command, Reply, StorageError, StorageResult};
use redis::{RedisError, Value};

/// Error code Redis uses when a command targets a key of another type.
const WRONG_TYPE_CODE: &str = "WRONGTYPE";

/// Converts a Redis client error to a storage error.
///
/// The mapping preserves the distinction callers act on: transport failures
/// and elapsed deadlines are transient, type mismatches point at corrupted
/// keys, and everything else is an internal failure.
pub fn redis_error_to_storage_error(err: RedisError) -> StorageError {
    if err.is_timeout() {
        tracing::warn!(error = %err, "Redis operation timed out");
        return StorageError::timeout();
    }

    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        return StorageError::connection_with_source("Redis connection failed", err);
    }

    if err.code() == Some(WRONG_TYPE_CODE) {
        return StorageError::wrong_type(err.detail().unwrap_or_default());
    }

    StorageError::internal_with_source(format!("Redis error ({:?})", err.kind()), err)
}

/// Converts the reply to one command of an `EXEC` into a [`Reply`].
///
/// Errors raised by individual commands inside a transaction arrive as
/// values rather than as a failed round trip, so they are surfaced here.
pub(crate) fn value_to_reply(command: &Command, value: Value) -> StorageResult<Reply> {
    match (command, value) {
        (_, Value::ServerError(err)) => {
            if err.code() == WRONG_TYPE_CODE {
                Err(StorageError::wrong_type(command.key()))
            } else {
                Err(StorageError::internal(format!("Redis command failed: {err:?}")))
            }
        },
        (Command::Get { .. }, Value::Nil) => Ok(Reply::Value(None)),
        (Command::Get { .. }, Value::BulkString(bytes)) => {
            Ok(Reply::Value(Some(Bytes::from(bytes))))
        },
        (Command::SetWithTtl { .. }, Value::Okay | Value::SimpleString(_)) => Ok(Reply::Ok),
        (_, Value::Int(n)) => Ok(Reply::Integer(n)),
        (command, other) => Err(StorageError::serialization(format!(
            "unexpected Redis reply for {} on {}: {other:?}",
            command_name(command),
            command.key()
        ))),
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Get { .. } => "GET",
        Command::SetWithTtl { .. } => "PSETEX",
        Command::Delete { .. } => "DEL",
        Command::ZAdd { .. } => "ZADD",
        Command::ZRem { .. } => "ZREM",
        Command::ZRemRangeByScore { .. } => "ZREMRANGEBYSCORE",
        Command::ZCard { .. } => "ZCARD",
        Command::PExpire { .. } => "PEXPIRE",
    }
}
