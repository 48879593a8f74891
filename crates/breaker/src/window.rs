//! Sliding-window accounting over the five counting sets.
//!
//! Every event is a sorted-set member scored by its wall-clock instant.
//! Reads prune members older than `now - interval` and then count, all in
//! one atomic batch, so counts always describe the sliding window.

use std::time::Duration;

use distbreaker_storage::{Batch, StorageBackend, StorageError, StorageResult};
use uuid::Uuid;

use crate::{
    keys::BreakerKeys,
    state::{StateRead, UnixNanos},
};

/// Event counts inside the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Counts {
    /// Calls counted in the window.
    pub requests: u64,
    /// Successful calls in the window.
    pub total_successes: u64,
    /// Failed calls in the window.
    pub total_failures: u64,
    /// Successes since the last failure.
    pub consecutive_successes: u64,
    /// Failures since the last success.
    pub consecutive_failures: u64,
}

/// Outcome of one counted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
}

/// Unique set member for an event at `now`.
///
/// The random suffix keeps simultaneous events from different processes
/// from collapsing into one member.
pub(crate) fn event_member(now: UnixNanos) -> String {
    format!("{}:{}", now.as_nanos(), Uuid::new_v4())
}

/// Appends the pruning commands for every window to `batch`.
pub(crate) fn prune(batch: &mut Batch, keys: &BreakerKeys, now: UnixNanos, interval: Duration) {
    let cutoff = now.saturating_sub(interval).as_nanos();
    for window in keys.windows() {
        batch.zrem_range_by_score(window, cutoff);
    }
}

/// Prunes the windows and reads the state record and counts in one batch.
pub(crate) async fn read<B>(
    store: &B,
    keys: &BreakerKeys,
    now: UnixNanos,
    interval: Duration,
) -> StorageResult<(StateRead, Counts)>
where
    B: StorageBackend + ?Sized,
{
    let mut batch = Batch::new();
    prune(&mut batch, keys, now, interval);
    batch.get(keys.state());
    for window in keys.windows() {
        batch.zcard(window);
    }

    let expected = batch.len();
    let replies = store.execute(batch).await?;
    if replies.len() != expected {
        return Err(StorageError::serialization(format!(
            "expected {expected} replies, got {}",
            replies.len()
        )));
    }

    let mut replies = replies.into_iter().skip(keys.windows().len());
    let mut next = || {
        replies.next().ok_or_else(|| StorageError::serialization("reply stream ended early"))
    };
    let state = StateRead::from_value(next()?.into_value()?);
    let mut cardinality = || -> StorageResult<u64> {
        let count = next()?.into_integer()?;
        u64::try_from(count)
            .map_err(|_| StorageError::serialization(format!("negative cardinality {count}")))
    };
    let counts = Counts {
        requests: cardinality()?,
        total_successes: cardinality()?,
        total_failures: cardinality()?,
        consecutive_successes: cardinality()?,
        consecutive_failures: cardinality()?,
    };
    Ok((state, counts))
}

/// Records one call outcome.
///
/// The event joins the request set, its outcome set, and its consecutive
/// set, while the opposite consecutive set is deleted. Expiry of every
/// window and of the state key is refreshed in the same batch.
pub(crate) async fn record<B>(
    store: &B,
    keys: &BreakerKeys,
    outcome: Outcome,
    now: UnixNanos,
    key_ttl: Duration,
) -> StorageResult<()>
where
    B: StorageBackend + ?Sized,
{
    let (total, streak, broken) = match outcome {
        Outcome::Success => {
            (&keys.successes, &keys.consecutive_successes, &keys.consecutive_failures)
        },
        Outcome::Failure => {
            (&keys.failures, &keys.consecutive_failures, &keys.consecutive_successes)
        },
    };
    let score = now.as_nanos();
    let member = event_member(now);

    let mut batch = Batch::new();
    batch
        .zadd(&keys.requests, score, member.clone())
        .zadd(total, score, member.clone())
        .zadd(streak, score, member)
        .delete(broken);
    for window in keys.windows() {
        batch.pexpire(window, key_ttl);
    }
    batch.pexpire(keys.state(), key_ttl);

    store.execute(batch).await.map(|_| ())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use distbreaker_storage::{Bytes, MemoryBackend};
    use proptest::prelude::*;

    use super::*;
    use crate::state::{Phase, StateRecord};

    const INTERVAL: Duration = Duration::from_secs(60);
    const TTL: Duration = Duration::from_secs(300);

    fn keys() -> BreakerKeys {
        BreakerKeys::new("test", "window")
    }

    #[tokio::test]
    async fn empty_store_reads_absent_and_zero() {
        let store = MemoryBackend::new();
        let (state, counts) = read(&store, &keys(), UnixNanos::now(), INTERVAL).await.unwrap();
        assert_eq!(state, StateRead::Absent);
        assert_eq!(counts, Counts::default());
    }

    #[tokio::test]
    async fn success_and_failure_update_every_window() {
        let store = MemoryBackend::new();
        let keys = keys();
        let now = UnixNanos::now();

        record(&store, &keys, Outcome::Failure, now, TTL).await.unwrap();
        record(&store, &keys, Outcome::Failure, now, TTL).await.unwrap();
        let (_, counts) = read(&store, &keys, now, INTERVAL).await.unwrap();
        assert_eq!(
            counts,
            Counts {
                requests: 2,
                total_successes: 0,
                total_failures: 2,
                consecutive_successes: 0,
                consecutive_failures: 2,
            }
        );

        record(&store, &keys, Outcome::Success, now, TTL).await.unwrap();
        let (_, counts) = read(&store, &keys, now, INTERVAL).await.unwrap();
        assert_eq!(
            counts,
            Counts {
                requests: 3,
                total_successes: 1,
                total_failures: 2,
                consecutive_successes: 1,
                consecutive_failures: 0,
            }
        );
    }

    #[tokio::test]
    async fn simultaneous_events_are_all_counted() {
        let store = MemoryBackend::new();
        let keys = keys();
        let now = UnixNanos::now();
        for _ in 0..10 {
            record(&store, &keys, Outcome::Failure, now, TTL).await.unwrap();
        }
        let (_, counts) = read(&store, &keys, now, INTERVAL).await.unwrap();
        assert_eq!(counts.total_failures, 10);
    }

    #[tokio::test]
    async fn events_older_than_interval_are_pruned() {
        let store = MemoryBackend::new();
        let keys = keys();
        let now = UnixNanos::now();
        let old = now.saturating_sub(INTERVAL + Duration::from_secs(1));

        record(&store, &keys, Outcome::Failure, old, TTL).await.unwrap();
        record(&store, &keys, Outcome::Failure, now, TTL).await.unwrap();

        let (_, counts) = read(&store, &keys, now, INTERVAL).await.unwrap();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn event_exactly_at_cutoff_is_kept() {
        let store = MemoryBackend::new();
        let keys = keys();
        let now = UnixNanos::now();

        record(&store, &keys, Outcome::Success, now.saturating_sub(INTERVAL), TTL).await.unwrap();
        let (_, counts) = read(&store, &keys, now, INTERVAL).await.unwrap();
        assert_eq!(counts.total_successes, 1);
    }

    #[tokio::test]
    async fn read_decodes_state_record() {
        let store = MemoryBackend::new();
        let keys = keys();
        let record = StateRecord::new(Phase::Open, UnixNanos::from_nanos(99));
        store.set_with_ttl(keys.state(), Bytes::from(record.encode()), TTL).await.unwrap();

        let (state, _) = read(&store, &keys, UnixNanos::now(), INTERVAL).await.unwrap();
        assert_eq!(state, StateRead::Present(record));
    }

    #[test]
    fn event_members_are_unique() {
        let now = UnixNanos::from_nanos(5);
        let a = event_member(now);
        let b = event_member(now);
        assert_ne!(a, b);
        assert!(a.starts_with("5:"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn pruning_twice_matches_pruning_once(
            ages_secs in proptest::collection::vec(0u64..180, 0..20),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let store = MemoryBackend::new();
                let keys = keys();
                let now = UnixNanos::now();
                for age in &ages_secs {
                    let at = now.saturating_sub(Duration::from_secs(*age));
                    record(&store, &keys, Outcome::Failure, at, TTL).await.unwrap();
                }

                let (_, once) = read(&store, &keys, now, INTERVAL).await.unwrap();
                let (_, twice) = read(&store, &keys, now, INTERVAL).await.unwrap();
                assert_eq!(once, twice);

                let in_window = ages_secs.iter().filter(|age| **age <= 60).count();
                assert_eq!(once.requests, u64::try_from(in_window).unwrap());
            });
        }
    }
}
