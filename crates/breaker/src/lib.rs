//! Circuit breaker whose state lives in a shared key-value store.
//!
//! Every process that protects the same resource with the same store,
//! prefix, and key sees one breaker. Phase changes are optimistic
//! compare-and-swap transactions on the store, so no process owns the
//! breaker and no lock service is involved.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  trip policy  ┌──────┐  open period ends  ┌──────────┐
//! │ Closed │ ────fires───→ │ Open │ ────────────────→  │ HalfOpen │
//! └────────┘               └──────┘ ←──trial fails──── └──────────┘
//!      ↑                                                    │
//!      └──────────────────── trial succeeds ────────────────┘
//! ```
//!
//! A closed breaker counts successes and failures in sliding windows of
//! [`BreakerConfig::interval`]. When the trip policy fires on those counts
//! the breaker opens for [`BreakerConfig::open_timeout`]. After that one
//! caller wins the half-open trial and its outcome closes the breaker (with
//! empty windows) or reopens it. A half-open record whose trial outlived its
//! own period is treated as expired, so a crashed trial holder cannot wedge
//! the breaker.
//!
//! # Quick Start
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use distbreaker::{
//!     BreakerConfig, BreakerError, BreakerSettings, CircuitBreaker, DistributedBreaker,
//!     MemoryBackend,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let config = BreakerConfig::builder()
//!     .prefix("checkout")
//!     .open_timeout(Duration::from_secs(30))
//!     .build()?;
//! let settings = BreakerSettings::<String>::new(config)?
//!     .with_ready_to_trip(|counts| counts.total_failures >= 3);
//!
//! let breaker = DistributedBreaker::new(Arc::new(MemoryBackend::new()), "payments", settings);
//! for _ in 0..3 {
//!     let failed = breaker.protect(|| async { Err::<(), _>("declined".to_owned()) }).await;
//!     assert!(matches!(failed, Err(BreakerError::Action(_))));
//! }
//!
//! let rejected = breaker.protect(|| async { Ok::<_, String>(()) }).await;
//! assert!(matches!(rejected, Err(BreakerError::Open)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```
//!
//! In production the store is a
//! [`RedisBackend`](https://docs.rs/distbreaker-storage-redis) shared by
//! every process.
//!
//! # Stored Keys
//!
//! See [`BreakerKeys`] for the seven keys each breaker uses. All of them
//! expire after [`BreakerConfig::key_ttl`] without activity, which returns
//! an abandoned breaker to closed.

#![deny(unsafe_code)]

mod breaker;
mod config;
mod error;
mod keys;
mod metrics;
mod state;
mod transition;
mod window;

pub use breaker::{BreakerSnapshot, CircuitBreaker, DistributedBreaker, protect};
pub use config::{
    BreakerConfig, BreakerSettings, DEFAULT_CONSECUTIVE_FAILURES, DEFAULT_INTERVAL,
    DEFAULT_KEY_TTL, DEFAULT_OPEN_TIMEOUT, DEFAULT_PREFIX, NotifyError,
};
pub use distbreaker_storage::{MemoryBackend, StorageBackend, StorageError};
pub use error::BreakerError;
pub use keys::BreakerKeys;
pub use metrics::BreakerMetricsSnapshot;
pub use state::{Phase, StateDecodeError, StateRead, StateRecord, UnixNanos};
pub use window::Counts;
