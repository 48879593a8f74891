//! Guarded phase transitions.
//!
//! Every transition is a compare-and-swap on the state key: watch it, re-read
//! the record inside the transaction, and commit only if the record still
//! equals the one the caller based its decision on. Equality covers the
//! phase and the period end, so two opens with different deadlines never
//! compare equal. A lost race is reported as `None` and the caller starts
//! over from a fresh read.

use distbreaker_storage::{Batch, StorageBackend, StorageError};
use thiserror::Error;

use crate::{
    config::BreakerSettings,
    error::BreakerError,
    keys::BreakerKeys,
    state::{Phase, StateDecodeError, StateRead, StateRecord, UnixNanos},
    window,
};

/// Failure of a transition other than a lost race.
#[derive(Debug, Error)]
pub(crate) enum TransitionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Decode(#[from] StateDecodeError),
}

impl<E> From<TransitionError> for BreakerError<E> {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Storage(err) => Self::Storage(err),
            TransitionError::Decode(err) => Self::Decode(err),
        }
    }
}

/// A half-open trial won by this caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Trial {
    record: StateRecord,
    marker: String,
}

async fn compare_and_swap<B>(
    store: &B,
    watched: &[&str],
    keys: &BreakerKeys,
    expected: StateRecord,
    batch: Batch,
) -> Result<bool, TransitionError>
where
    B: StorageBackend + ?Sized,
{
    let txn = store.watch(watched).await?;
    let current = StateRead::from_value(txn.get(keys.state()).await?).into_record()?;
    if !expected.guards(&current) {
        tracing::debug!(
            expected = %expected,
            current = %current,
            "state record changed before transition",
        );
        return Ok(false);
    }
    match txn.commit(batch).await {
        Ok(_) => Ok(true),
        Err(StorageError::Conflict) => {
            tracing::debug!(state_key = keys.state(), "watched key changed before commit");
            Ok(false)
        },
        Err(err) => Err(err.into()),
    }
}

/// Moves the breaker from `expected` to open until `now + open_timeout`.
///
/// Returns the new record, or `None` if the stored record no longer matches
/// `expected`.
pub(crate) async fn open_from<B, E>(
    store: &B,
    keys: &BreakerKeys,
    settings: &BreakerSettings<E>,
    expected: StateRecord,
    now: UnixNanos,
) -> Result<Option<StateRecord>, TransitionError>
where
    B: StorageBackend + ?Sized,
{
    let config = settings.config();
    let opened = StateRecord::new(Phase::Open, now + config.open_timeout());

    let mut batch = Batch::new();
    batch.set_with_ttl(keys.state(), opened.encode(), config.key_ttl());
    if !compare_and_swap(store, &[keys.state()], keys, expected, batch).await? {
        return Ok(None);
    }

    tracing::info!(
        previous_state = %expected.phase,
        new_state = "open",
        period_end = %opened.period_end,
        "circuit breaker opened",
    );
    settings.notify(expected.phase, Phase::Open);
    Ok(Some(opened))
}

/// Moves the breaker from `expected` to half-open and claims the trial.
///
/// The trial marker is written in the same transaction as the state, so
/// only the caller whose commit lands may run the action.
pub(crate) async fn acquire_trial<B, E>(
    store: &B,
    keys: &BreakerKeys,
    settings: &BreakerSettings<E>,
    expected: StateRecord,
    now: UnixNanos,
) -> Result<Option<Trial>, TransitionError>
where
    B: StorageBackend + ?Sized,
{
    let config = settings.config();
    let record = StateRecord::new(Phase::HalfOpen, now + config.open_timeout());
    let marker = window::event_member(now);

    let mut batch = Batch::new();
    batch
        .set_with_ttl(keys.state(), record.encode(), config.key_ttl())
        .zadd(keys.half_open(), now.as_nanos(), marker.clone())
        .pexpire(keys.half_open(), config.key_ttl());
    let watched = [keys.state(), keys.half_open()];
    if !compare_and_swap(store, &watched, keys, expected, batch).await? {
        return Ok(None);
    }

    tracing::info!(
        previous_state = %expected.phase,
        new_state = "half",
        "circuit breaker half-open, running trial",
    );
    settings.notify(expected.phase, Phase::HalfOpen);
    Ok(Some(Trial { record, marker }))
}

/// Closes the breaker after a successful trial, deleting every key so the
/// windows start empty.
pub(crate) async fn close_after_trial<B, E>(
    store: &B,
    keys: &BreakerKeys,
    settings: &BreakerSettings<E>,
    trial: Trial,
) -> Result<(), TransitionError>
where
    B: StorageBackend + ?Sized,
{
    let mut batch = Batch::new();
    batch.zrem(keys.half_open(), trial.marker);
    for key in keys.all() {
        batch.delete(key);
    }
    store.execute(batch).await?;

    tracing::info!(
        previous_state = "half",
        new_state = "closed",
        "circuit breaker closed after successful trial",
    );
    settings.notify(Phase::HalfOpen, Phase::Closed);
    Ok(())
}

/// Reopens the breaker after a failed trial and drops the trial marker.
///
/// Returns `None` if another caller changed the record in the meantime;
/// the breaker is then left as that caller set it.
pub(crate) async fn reopen_after_trial<B, E>(
    store: &B,
    keys: &BreakerKeys,
    settings: &BreakerSettings<E>,
    trial: Trial,
    now: UnixNanos,
) -> Result<Option<StateRecord>, TransitionError>
where
    B: StorageBackend + ?Sized,
{
    let reopened = open_from(store, keys, settings, trial.record, now).await;
    if let Ok(None) = reopened {
        tracing::warn!(
            trial_state = %trial.record,
            "trial failed but the state record changed, breaker not reopened",
        );
    }

    // The marker is dropped whether or not the reopen went through.
    let mut batch = Batch::new();
    batch.zrem(keys.half_open(), trial.marker);
    let removed = store.execute(batch).await;

    let reopened = reopened?;
    removed?;
    Ok(reopened)
}
