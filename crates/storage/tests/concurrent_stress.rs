//! Concurrent access stress tests for `MemoryBackend`.
//!
//! These tests exercise the storage backend under multi-threaded workloads
//! shaped like breaker traffic (sorted-set inserts, pruning, watched state
//! swaps) to detect data races, deadlocks, and lost updates. They are ignored
//! by default for CI runtime control:
//!
//! ```bash
//! cargo test -p distbreaker-storage --test concurrent_stress -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::panic)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use distbreaker_storage::{
    Batch, Bytes, MemoryBackend, StorageBackend, error::StorageError, testutil::make_member,
};
use tokio::{sync::Barrier, task::JoinSet};

/// Number of concurrent tasks for most tests.
const CONCURRENCY: usize = 16;

/// Number of watch rounds for the exactly-one-winner test.
const CAS_ROUNDS: usize = 50;

/// Number of operations each task performs in mixed workload tests.
const OPS_PER_TASK: usize = 100;

const TTL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Test: Watched swaps: exactly one winner per round
// ---------------------------------------------------------------------------

/// Runs `CAS_ROUNDS` rounds of contention. In each round every task watches
/// the key and reads it before any task commits, so exactly one commit can
/// succeed and all others must receive `StorageError::Conflict`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn watched_swap_exactly_one_winner_per_round() {
    let backend = MemoryBackend::new();

    for round in 0..CAS_ROUNDS {
        let current = format!("round-{round}");
        backend
            .set_with_ttl("cas-key", Bytes::from(current.clone()), TTL)
            .await
            .expect("setup set should succeed");

        let barrier = Arc::new(Barrier::new(CONCURRENCY));
        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let backend = backend.clone();
            let barrier = Arc::clone(&barrier);
            let expected = current.clone();
            set.spawn(async move {
                let txn = backend.watch(&["cas-key"]).await.expect("watch should succeed");
                let seen = txn.get("cas-key").await.expect("read should succeed");
                assert_eq!(seen.as_deref(), Some(expected.as_bytes()));

                barrier.wait().await;

                let mut batch = Batch::new();
                batch.set_with_ttl("cas-key", format!("round-{round}-winner-{task_id}"), TTL);
                txn.commit(batch).await
            });
        }

        let mut successes = 0usize;
        let mut conflicts = 0usize;
        while let Some(result) = set.join_next().await {
            match result.expect("task should not panic") {
                Ok(_) => successes += 1,
                Err(StorageError::Conflict) => conflicts += 1,
                Err(e) => panic!("unexpected error in round {round}: {e}"),
            }
        }

        assert_eq!(successes, 1, "round {round}: exactly one commit should succeed");
        assert_eq!(conflicts, CONCURRENCY - 1, "round {round}: all other commits should conflict");
    }
}

// ---------------------------------------------------------------------------
// Test: Parallel inserts into one sorted set
// ---------------------------------------------------------------------------

/// Every task inserts distinct members into the same set. No insert may be lost.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn parallel_inserts_lose_nothing() {
    let backend = MemoryBackend::new();

    let mut set = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let backend = backend.clone();
        set.spawn(async move {
            for i in 0..OPS_PER_TASK {
                let mut batch = Batch::new();
                let score = i64::try_from(i).expect("score fits");
                batch.zadd("events", score, make_member(task_id, i)).pexpire("events", TTL);
                backend.execute(batch).await.expect("insert should succeed");
            }
            task_id
        });
    }

    let mut completed = HashSet::new();
    while let Some(result) = set.join_next().await {
        completed.insert(result.expect("task should not panic"));
    }
    assert_eq!(completed.len(), CONCURRENCY, "all tasks should complete");

    let expected = u64::try_from(CONCURRENCY * OPS_PER_TASK).expect("count fits");
    assert_eq!(backend.zcard("events").await.expect("zcard"), expected);
}

// ---------------------------------------------------------------------------
// Test: Pruning concurrent with inserts
// ---------------------------------------------------------------------------

/// Writers insert members with increasing scores while pruners repeatedly drop
/// everything below a moving cutoff. Members at or above the final cutoff must
/// all survive.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn pruning_during_inserts_keeps_recent_members() {
    let backend = MemoryBackend::new();
    let writers = 8;
    let final_cutoff = i64::try_from(OPS_PER_TASK / 2).expect("cutoff fits");

    let mut set = JoinSet::new();
    for task_id in 0..writers {
        let backend = backend.clone();
        set.spawn(async move {
            for i in 0..OPS_PER_TASK {
                let mut batch = Batch::new();
                let score = i64::try_from(i).expect("score fits");
                batch.zadd("window", score, make_member(task_id, i));
                backend.execute(batch).await.expect("insert should succeed");
            }
        });
    }

    for _ in 0..4 {
        let backend = backend.clone();
        set.spawn(async move {
            for cutoff in 0..=final_cutoff {
                let mut batch = Batch::new();
                batch.zrem_range_by_score("window", cutoff).zcard("window");
                backend.execute(batch).await.expect("prune should succeed");
                tokio::task::yield_now().await;
            }
        });
    }

    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    // Inserts may land after the last prune, so only a lower bound holds.
    let survivors = backend.zcard("window").await.expect("zcard");
    let recent = u64::try_from(writers * (OPS_PER_TASK / 2)).expect("count fits");
    assert!(survivors >= recent, "members at or above the cutoff must survive: {survivors}");
}

// ---------------------------------------------------------------------------
// Test: TTL expiration concurrent with reads
// ---------------------------------------------------------------------------

/// Tasks set keys with short TTLs while other tasks continuously read them.
/// Reads must return the value or `None` (after expiration), never an error.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn ttl_expiration_concurrent_with_reads() {
    let backend = MemoryBackend::new();
    let key_count = 50;

    let mut set = JoinSet::new();
    for i in 0..key_count {
        let backend = backend.clone();
        set.spawn(async move {
            let key = format!("ttl-race:{i:06}");
            backend
                .set_with_ttl(&key, Bytes::from(format!("task-{i}")), Duration::from_millis(50))
                .await
                .expect("set_with_ttl should succeed");
        });
    }

    for _ in 0..CONCURRENCY {
        let backend = backend.clone();
        set.spawn(async move {
            for iteration in 0..200 {
                let key = format!("ttl-race:{:06}", iteration % key_count);
                match backend.get(&key).await {
                    Ok(Some(value)) => {
                        let s =
                            String::from_utf8(value.to_vec()).expect("value should be valid utf-8");
                        assert!(s.starts_with("task"), "value should be from writer, got: {s}");
                    },
                    Ok(None) => {},
                    Err(e) => panic!("unexpected error reading TTL key: {e}"),
                }
                tokio::task::yield_now().await;
            }
        });
    }

    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }
}
