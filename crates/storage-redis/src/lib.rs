//! Redis-backed implementation of
//! [`StorageBackend`](distbreaker_storage::StorageBackend).
//!
//! This crate provides [`RedisBackend`], the production store for the
//! distributed circuit breaker. Every process that protects the same
//! resource points at the same Redis server and thereby shares one breaker.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 distbreaker                   │
//! ├───────────────────────────────────────────────┤
//! │                RedisBackend                   │
//! │      (implements StorageBackend trait)        │
//! ├───────────────────────┬───────────────────────┤
//! │   ConnectionManager   │ dedicated connection  │
//! │   (batches, PING)     │  per WATCH / EXEC     │
//! ├───────────────────────┴───────────────────────┤
//! │                   Redis                       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! // Requires a running Redis server.
//! use distbreaker_storage::StorageBackend;
//! use distbreaker_storage_redis::{RedisBackend, RedisBackendConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisBackendConfig::builder().url("redis://127.0.0.1:6379").build()?;
//!     let backend = RedisBackend::new(config).await?;
//!
//!     backend.health_check().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Command Mapping
//!
//! | Command | Redis |
//! | ------- | ----- |
//! | `Get` | `GET` |
//! | `SetWithTtl` | `PSETEX` |
//! | `Delete` | `DEL` |
//! | `ZAdd` | `ZADD` |
//! | `ZRem` | `ZREM` |
//! | `ZRemRangeByScore` | `ZREMRANGEBYSCORE key -inf (below` |
//! | `ZCard` | `ZCARD` |
//! | `PExpire` | `PEXPIRE` |
//!
//! Batches are sent as `MULTI`/`EXEC` pipelines.

#![deny(unsafe_code)]

mod backend;
mod config;
mod error;
mod transaction;

pub use backend::RedisBackend;
pub use config::RedisBackendConfig;
pub use error::redis_error_to_storage_error;
pub use transaction::RedisTransaction;
