//! Errors returned by a protected call.

use distbreaker_storage::StorageError;
use thiserror::Error;

use crate::state::StateDecodeError;

/// Failure of a protected call.
///
/// `E` is the action's own error type; it is passed through unchanged in
/// [`BreakerError::Action`] whenever the action ran.
///
/// A transaction conflict is never returned: it makes the breaker
/// re-evaluate its decision from a fresh read instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BreakerError<E> {
    /// The breaker withheld the action: it is open, or another caller holds
    /// the trial.
    #[error("circuit breaker is open")]
    Open,

    /// The action ran and failed.
    #[error("{0}")]
    Action(E),

    /// The shared store could not be reached or returned an error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The stored state record is malformed.
    #[error(transparent)]
    Decode(#[from] StateDecodeError),
}

impl<E> BreakerError<E> {
    /// Returns `true` if the call was rejected without running the action.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns the action's error, if the action ran and failed.
    #[must_use]
    pub fn into_action(self) -> Option<E> {
        match self {
            Self::Action(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` for store failures that may succeed on a later call.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_transient())
    }
}
