//! The protect loop and the breaker handle.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use distbreaker_storage::{Batch, StorageBackend, StorageResult};

use crate::{
    config::BreakerSettings,
    error::BreakerError,
    keys::BreakerKeys,
    metrics::{BreakerMetrics, BreakerMetricsSnapshot},
    state::{Phase, StateRecord, UnixNanos},
    transition,
    window::{self, Counts, Outcome},
};

/// Runs `action` under the breaker `key` stored in `store`.
///
/// The decision is taken from a fresh read of the shared state:
///
/// - closed, trip policy false: the action runs and its outcome is counted
/// - closed, trip policy true: the breaker opens and the call is rejected
/// - open or half-open before the period end: the call is rejected
/// - open or half-open after the period end: the caller tries to claim the
///   trial; the winner runs the action and settles the breaker from its
///   outcome, losers re-read and are rejected
///
/// A transition that loses a race to another process restarts the decision.
/// The action is invoked at most once.
///
/// # Errors
///
/// - [`BreakerError::Open`] when the action was withheld
/// - [`BreakerError::Action`] with the action's own error
/// - [`BreakerError::Storage`] when the store fails before the action runs
/// - [`BreakerError::Decode`] when the stored state record is malformed
///
/// # Example
///
/// ```
/// use distbreaker::{BreakerSettings, MemoryBackend, protect};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryBackend::new();
/// let settings = BreakerSettings::<std::io::Error>::default();
///
/// let value = protect(&store, "inventory", &settings, || async { Ok(7) }).await.unwrap();
/// assert_eq!(value, 7);
/// # });
/// ```
#[tracing::instrument(skip(store, settings, action))]
pub async fn protect<B, T, E, F, Fut>(
    store: &B,
    key: &str,
    settings: &BreakerSettings<E>,
    action: F,
) -> Result<T, BreakerError<E>>
where
    B: StorageBackend + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run(store, key, settings, None, action).await
}

async fn run<B, T, E, F, Fut>(
    store: &B,
    key: &str,
    settings: &BreakerSettings<E>,
    metrics: Option<&BreakerMetrics>,
    action: F,
) -> Result<T, BreakerError<E>>
where
    B: StorageBackend + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let config = settings.config();
    let keys = BreakerKeys::new(config.prefix(), key);
    let count = move |update: fn(&BreakerMetrics)| {
        if let Some(metrics) = metrics {
            update(metrics);
        }
    };

    loop {
        let now = UnixNanos::now();
        let (state, counts) = window::read(store, &keys, now, config.interval()).await?;
        let record = state.into_record()?;

        match record.phase {
            Phase::Closed if !settings.ready_to_trip(&counts) => {
                count(BreakerMetrics::record_call);
                let result = action().await;
                let outcome =
                    if settings.is_success(&result) { Outcome::Success } else { Outcome::Failure };
                let recorded =
                    window::record(store, &keys, outcome, UnixNanos::now(), config.key_ttl());
                if let Err(error) = recorded.await {
                    tracing::warn!(error = %error, "failed to record call outcome");
                }
                return result.map_err(BreakerError::Action);
            },
            Phase::Closed => {
                tracing::debug!(
                    requests = counts.requests,
                    total_failures = counts.total_failures,
                    consecutive_failures = counts.consecutive_failures,
                    "trip policy fired",
                );
                if transition::open_from(store, &keys, settings, record, now).await?.is_some() {
                    count(BreakerMetrics::record_transition);
                    count(BreakerMetrics::record_rejection);
                    return Err(BreakerError::Open);
                }
            },
            Phase::Open | Phase::HalfOpen if now < record.period_end => {
                count(BreakerMetrics::record_rejection);
                return Err(BreakerError::Open);
            },
            Phase::Open | Phase::HalfOpen => {
                if let Some(trial) =
                    transition::acquire_trial(store, &keys, settings, record, now).await?
                {
                    count(BreakerMetrics::record_transition);
                    count(BreakerMetrics::record_trial);
                    count(BreakerMetrics::record_call);

                    let result = action().await;
                    let settled = if settings.is_success(&result) {
                        transition::close_after_trial(store, &keys, settings, trial)
                            .await
                            .map(|()| true)
                    } else {
                        transition::reopen_after_trial(
                            store,
                            &keys,
                            settings,
                            trial,
                            UnixNanos::now(),
                        )
                        .await
                        .map(|reopened| reopened.is_some())
                    };
                    match settled {
                        Ok(true) => count(BreakerMetrics::record_transition),
                        Ok(false) => {},
                        Err(error) => {
                            tracing::warn!(error = %error, "failed to settle trial outcome");
                        },
                    }
                    return result.map_err(BreakerError::Action);
                }
            },
        }

        count(BreakerMetrics::record_conflict);
        tracing::debug!(phase = %record.phase, "transition lost a race, re-evaluating");
    }
}

/// A breaker guarding calls of type `Result<T, E>`.
#[async_trait]
pub trait CircuitBreaker<T, E>: Send + Sync {
    /// Runs `action` if the breaker allows it.
    ///
    /// # Errors
    ///
    /// See [`protect`].
    async fn protect<F, Fut>(&self, action: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send;
}

/// Point-in-time view of a breaker's shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Stored state record, [`StateRecord::CLOSED`] when absent.
    pub state: StateRecord,
    /// Counts inside the current window.
    pub counts: Counts,
}

/// A breaker handle bound to one store, key, and settings.
///
/// Clones share the process-local metrics. Handles in other processes that
/// use the same store, prefix, and key share the breaker itself.
///
/// ```
/// use std::sync::Arc;
///
/// use distbreaker::{BreakerSettings, CircuitBreaker, DistributedBreaker, MemoryBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = Arc::new(MemoryBackend::new());
/// let breaker = DistributedBreaker::new(store, "search", BreakerSettings::<String>::default());
///
/// let hits = breaker.protect(|| async { Ok::<_, String>(3) }).await.unwrap();
/// assert_eq!(hits, 3);
/// assert_eq!(breaker.metrics().calls, 1);
/// # });
/// ```
pub struct DistributedBreaker<B: ?Sized, E> {
    store: Arc<B>,
    key: String,
    settings: BreakerSettings<E>,
    metrics: Arc<BreakerMetrics>,
}

impl<B, E> DistributedBreaker<B, E>
where
    B: StorageBackend + ?Sized,
{
    /// Creates a handle for breaker `key`.
    pub fn new(store: Arc<B>, key: impl Into<String>, settings: BreakerSettings<E>) -> Self {
        Self { store, key: key.into(), settings, metrics: Arc::default() }
    }

    /// Returns the breaker key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &BreakerSettings<E> {
        &self.settings
    }

    /// Runs `action` if the breaker allows it, updating this handle's metrics.
    ///
    /// # Errors
    ///
    /// See [`protect`].
    #[tracing::instrument(skip_all, fields(key = %self.key))]
    pub async fn call<T, F, Fut>(&self, action: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        run(self.store.as_ref(), &self.key, &self.settings, Some(&self.metrics), action).await
    }

    /// Reads the state record and counts, pruning expired events.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Storage`] if the store fails or
    /// [`BreakerError::Decode`] if the record is malformed.
    pub async fn snapshot(&self) -> Result<BreakerSnapshot, BreakerError<E>> {
        let config = self.settings.config();
        let keys = BreakerKeys::new(config.prefix(), &self.key);
        let (state, counts) =
            window::read(self.store.as_ref(), &keys, UnixNanos::now(), config.interval()).await?;
        Ok(BreakerSnapshot { state: state.into_record()?, counts })
    }

    /// Deletes every key of the breaker, returning it to closed with empty
    /// windows. No notification is sent.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`](distbreaker_storage::StorageError) if the
    /// delete fails.
    pub async fn reset(&self) -> StorageResult<()> {
        let keys = BreakerKeys::new(self.settings.config().prefix(), &self.key);
        let batch: Batch = keys.all().into_iter().fold(Batch::new(), |mut batch, key| {
            batch.delete(key);
            batch
        });
        self.store.execute(batch).await?;
        tracing::info!(key = %self.key, "circuit breaker reset");
        Ok(())
    }

    /// Returns a snapshot of this handle's metrics.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl<B, T, E> CircuitBreaker<T, E> for DistributedBreaker<B, E>
where
    B: StorageBackend + ?Sized + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn protect<F, Fut>(&self, action: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.call(action).await
    }
}

impl<B: ?Sized, E> Clone for DistributedBreaker<B, E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            settings: self.settings.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<B: ?Sized, E> fmt::Debug for DistributedBreaker<B, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedBreaker")
            .field("key", &self.key)
            .field("settings", &self.settings)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
