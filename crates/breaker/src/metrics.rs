//! Process-local counters for one breaker handle.
//!
//! These count what this process observed; other processes sharing the
//! breaker keep their own.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by [`DistributedBreaker`](crate::DistributedBreaker).
#[derive(Debug, Default)]
pub(crate) struct BreakerMetrics {
    calls: AtomicU64,
    rejections: AtomicU64,
    state_transitions: AtomicU64,
    trials: AtomicU64,
    conflicts: AtomicU64,
}

impl BreakerMetrics {
    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition(&self) {
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_trial(&self) {
        self.trials.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BreakerMetricsSnapshot {
        BreakerMetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            trials: self.trials.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of breaker metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerMetricsSnapshot {
    /// Times the action was invoked, trials included.
    pub calls: u64,
    /// Calls rejected without invoking the action.
    pub rejections: u64,
    /// Transitions committed by this process.
    pub state_transitions: u64,
    /// Trials this process won and ran.
    pub trials: u64,
    /// Transactions that lost a race and were re-evaluated.
    pub conflicts: u64,
}
