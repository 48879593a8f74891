//! Conformance test suite for [`StorageBackend`] implementations.
//!
//! This module provides a set of async test functions that validate whether a
//! [`StorageBackend`] implementation correctly satisfies the trait contract.
//! The in-memory backend and the Redis backend run the same suite, which is
//! what lets breaker tests against [`MemoryBackend`](crate::MemoryBackend)
//! stand in for a real deployment.
//!
//! Every check clears the keys it uses before starting, so the suite can run
//! against a shared server that already holds unrelated data.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with
//! a backend instance:
//!
//! ```no_run
//! use distbreaker_storage::conformance;
//! use distbreaker_storage::MemoryBackend;
//!
//! #[tokio::test]
//! async fn string_get_returns_none_for_missing_key() {
//!     conformance::string_get_returns_none_for_missing_key(&MemoryBackend::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Functions | Contract aspect |
//! |----------|-----------|-----------------|
//! | String | 4 tests | Basic get/set/delete semantics |
//! | TTL | 3 tests | Expiry and expiry refresh |
//! | Sorted set | 6 tests | Membership, cardinality, range removal |
//! | Batch | 2 tests | Reply ordering and partial failure |
//! | Transaction | 5 tests | Watch, commit, conflict detection |
//! | Concurrent | 2 tests | Thread-safety under parallel access |
//! | Health | 1 test | Availability check |

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::{
    assert_conflict, assert_wrong_type,
    backend::StorageBackend,
    batch::{Batch, Reply},
    error::{StorageError, StorageResult},
};

const TTL: Duration = Duration::from_secs(60);

async fn clear<B: StorageBackend + ?Sized>(backend: &B, keys: &[&str]) {
    for key in keys {
        backend.delete(key).await.expect("clearing test key");
    }
}

// ============================================================================
// String: basic get/set/delete semantics (4 tests)
// ============================================================================

/// `get` on a nonexistent key returns `Ok(None)`.
pub async fn string_get_returns_none_for_missing_key<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:str:missing"]).await;
    let result = backend.get("conf:str:missing").await;
    assert!(result.is_ok(), "get should not error on missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None, "missing key should return None");
}

/// `set_with_ttl` on an existing key overwrites the value.
pub async fn string_set_overwrites_existing<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:str:overwrite"]).await;
    backend.set_with_ttl("conf:str:overwrite", Bytes::from("original"), TTL).await.expect("set");
    backend.set_with_ttl("conf:str:overwrite", Bytes::from("updated"), TTL).await.expect("set");
    let val = backend.get("conf:str:overwrite").await.expect("get");
    assert_eq!(val, Some(Bytes::from("updated")));
}

/// `delete` removes a key and repeating it is a no-op.
pub async fn string_delete_is_idempotent<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:str:delete"]).await;
    backend.set_with_ttl("conf:str:delete", Bytes::from("v"), TTL).await.expect("set");
    backend.delete("conf:str:delete").await.expect("first delete");
    backend.delete("conf:str:delete").await.expect("second delete should be noop");
    assert_eq!(backend.get("conf:str:delete").await.expect("get"), None);
}

/// `delete` reports how many keys it removed.
pub async fn string_delete_reports_count<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:str:count"]).await;
    backend.set_with_ttl("conf:str:count", Bytes::from("v"), TTL).await.expect("set");

    let mut batch = Batch::new();
    batch.delete("conf:str:count").delete("conf:str:count");
    let replies = backend.execute(batch).await.expect("execute");
    assert_eq!(replies, vec![Reply::Integer(1), Reply::Integer(0)]);
}

// ============================================================================
// TTL: expiry and expiry refresh (3 tests)
// ============================================================================

/// A string written with a short TTL reads as absent once it elapses.
pub async fn ttl_key_expires<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:ttl:expire"]).await;
    let short = Duration::from_millis(50);
    backend.set_with_ttl("conf:ttl:expire", Bytes::from("v"), short).await.expect("set");
    assert!(backend.get("conf:ttl:expire").await.expect("get").is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.get("conf:ttl:expire").await.expect("get"), None);
}

/// `pexpire` extends the lifetime of a sorted set.
pub async fn ttl_pexpire_refreshes_expiry<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:ttl:refresh"]).await;
    let mut batch = Batch::new();
    batch.zadd("conf:ttl:refresh", 1, "m").pexpire("conf:ttl:refresh", Duration::from_millis(50));
    backend.execute(batch).await.expect("execute");

    let mut batch = Batch::new();
    batch.pexpire("conf:ttl:refresh", TTL);
    backend.execute(batch).await.expect("execute");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.zcard("conf:ttl:refresh").await.expect("zcard"), 1);
}

/// `pexpire` on an absent key replies `0` and does not create the key.
pub async fn ttl_pexpire_on_missing_key_is_noop<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:ttl:missing"]).await;
    let mut batch = Batch::new();
    batch.pexpire("conf:ttl:missing", TTL).zcard("conf:ttl:missing");
    let replies = backend.execute(batch).await.expect("execute");
    assert_eq!(replies, vec![Reply::Integer(0), Reply::Integer(0)]);
}

// ============================================================================
// Sorted set: membership, cardinality, range removal (6 tests)
// ============================================================================

/// `zcard` on an absent key is zero.
pub async fn zset_missing_key_has_zero_cardinality<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:z:missing"]).await;
    assert_eq!(backend.zcard("conf:z:missing").await.expect("zcard"), 0);
}

/// Re-adding an existing member updates its score without growing the set.
pub async fn zset_add_is_idempotent_per_member<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:z:add"]).await;
    let mut batch = Batch::new();
    batch.zadd("conf:z:add", 1, "a").zadd("conf:z:add", 5, "a").zadd("conf:z:add", 2, "b");
    let replies = backend.execute(batch).await.expect("execute");
    assert_eq!(replies, vec![Reply::Integer(1), Reply::Integer(0), Reply::Integer(1)]);
    assert_eq!(backend.zcard("conf:z:add").await.expect("zcard"), 2);

    // The updated score (5) must survive a cutoff that the original (1) would not.
    let mut batch = Batch::new();
    batch.zrem_range_by_score("conf:z:add", 3);
    backend.execute(batch).await.expect("execute");
    assert_eq!(backend.zcard("conf:z:add").await.expect("zcard"), 1);
}

/// `zrem` removes exactly the named member.
pub async fn zset_remove_member<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:z:rem"]).await;
    let mut batch = Batch::new();
    batch.zadd("conf:z:rem", 1, "a").zadd("conf:z:rem", 2, "b");
    backend.execute(batch).await.expect("execute");

    let mut batch = Batch::new();
    batch.zrem("conf:z:rem", "a").zrem("conf:z:rem", "ghost");
    let replies = backend.execute(batch).await.expect("execute");
    assert_eq!(replies, vec![Reply::Integer(1), Reply::Integer(0)]);
    assert_eq!(backend.zcard("conf:z:rem").await.expect("zcard"), 1);
}

/// Range removal drops scores strictly below the bound and keeps the bound itself.
pub async fn zset_range_removal_is_exclusive<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:z:range"]).await;
    let mut batch = Batch::new();
    batch
        .zadd("conf:z:range", -5, "neg")
        .zadd("conf:z:range", 99, "below")
        .zadd("conf:z:range", 100, "at")
        .zadd("conf:z:range", 101, "above");
    backend.execute(batch).await.expect("execute");

    let mut batch = Batch::new();
    batch.zrem_range_by_score("conf:z:range", 100).zrem_range_by_score("conf:z:range", 100);
    let replies = backend.execute(batch).await.expect("execute");
    assert_eq!(replies, vec![Reply::Integer(2), Reply::Integer(0)]);
    assert_eq!(backend.zcard("conf:z:range").await.expect("zcard"), 2);
}

/// A sorted set emptied by removal no longer exists, so the key can be
/// reused for a string.
pub async fn zset_emptied_set_is_removed<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:z:empty"]).await;
    let mut batch = Batch::new();
    batch.zadd("conf:z:empty", 1, "only").zrem_range_by_score("conf:z:empty", 10);
    backend.execute(batch).await.expect("execute");

    assert_eq!(backend.get("conf:z:empty").await.expect("get on removed set"), None);
}

/// Mixing data types on one key yields `WrongType`.
pub async fn zset_wrong_type_is_reported<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:z:str"]).await;
    backend.set_with_ttl("conf:z:str", Bytes::from("v"), TTL).await.expect("set");
    let result = backend.zcard("conf:z:str").await;
    assert_wrong_type!(result, "zcard on a string key");
}

// ============================================================================
// Batch: reply ordering and partial failure (2 tests)
// ============================================================================

/// Replies come back one per command, in submission order.
pub async fn batch_replies_match_commands<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:batch:s", "conf:batch:z"]).await;
    let mut batch = Batch::new();
    batch
        .set_with_ttl("conf:batch:s", "v", TTL)
        .zadd("conf:batch:z", 1, "m")
        .get("conf:batch:s")
        .zcard("conf:batch:z")
        .get("conf:batch:missing");
    let replies = backend.execute(batch).await.expect("execute");

    assert_eq!(
        replies,
        vec![
            Reply::Ok,
            Reply::Integer(1),
            Reply::Value(Some(Bytes::from("v"))),
            Reply::Integer(1),
            Reply::Value(None),
        ]
    );
}

/// A failing command does not roll back the commands before it.
pub async fn batch_wrong_type_keeps_earlier_commands<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:batch:first", "conf:batch:str"]).await;
    backend.set_with_ttl("conf:batch:str", Bytes::from("v"), TTL).await.expect("set");

    let mut batch = Batch::new();
    batch.zadd("conf:batch:first", 1, "m").zadd("conf:batch:str", 1, "m");
    let result = backend.execute(batch).await;
    assert_wrong_type!(result, "zadd on a string key");

    assert_eq!(backend.zcard("conf:batch:first").await.expect("zcard"), 1);
}

// ============================================================================
// Transaction: watch, commit, conflict detection (5 tests)
// ============================================================================

/// An untouched watch commits and the transaction sees current values.
pub async fn tx_commit_applies_batch<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:tx:apply", "conf:tx:apply:z"]).await;
    backend.set_with_ttl("conf:tx:apply", Bytes::from("old"), TTL).await.expect("set");

    let txn = backend.watch(&["conf:tx:apply"]).await.expect("watch");
    assert_eq!(txn.get("conf:tx:apply").await.expect("txn get"), Some(Bytes::from("old")));

    let mut batch = Batch::new();
    batch.set_with_ttl("conf:tx:apply", "new", TTL).zadd("conf:tx:apply:z", 1, "m");
    let replies = txn.commit(batch).await.expect("commit");
    assert_eq!(replies, vec![Reply::Ok, Reply::Integer(1)]);

    assert_eq!(backend.get("conf:tx:apply").await.expect("get"), Some(Bytes::from("new")));
    assert_eq!(backend.zcard("conf:tx:apply:z").await.expect("zcard"), 1);
}

/// A write to a watched key between watch and commit rejects the commit.
pub async fn tx_concurrent_write_conflicts<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:tx:conflict"]).await;
    let txn = backend.watch(&["conf:tx:conflict"]).await.expect("watch");
    backend.set_with_ttl("conf:tx:conflict", Bytes::from("theirs"), TTL).await.expect("set");

    let mut batch = Batch::new();
    batch.set_with_ttl("conf:tx:conflict", "ours", TTL);
    let result = txn.commit(batch).await;
    assert_conflict!(result, "write after watch should conflict");

    let val = backend.get("conf:tx:conflict").await.expect("get");
    assert_eq!(val, Some(Bytes::from("theirs")), "concurrent writer's value must survive");
}

/// Expiry of a watched key counts as a modification.
pub async fn tx_expiry_conflicts<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:tx:expire"]).await;
    let short = Duration::from_millis(50);
    backend.set_with_ttl("conf:tx:expire", Bytes::from("v"), short).await.expect("set");

    let txn = backend.watch(&["conf:tx:expire"]).await.expect("watch");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut batch = Batch::new();
    batch.set_with_ttl("conf:tx:expire", "late", TTL);
    let result = txn.commit(batch).await;
    assert_conflict!(result, "expiry of a watched key should conflict");
}

/// Writes to keys that are not watched do not invalidate the watch.
pub async fn tx_unwatched_write_does_not_conflict<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:tx:mine", "conf:tx:other"]).await;
    let txn = backend.watch(&["conf:tx:mine"]).await.expect("watch");
    backend.set_with_ttl("conf:tx:other", Bytes::from("v"), TTL).await.expect("set");

    let mut batch = Batch::new();
    batch.set_with_ttl("conf:tx:mine", "v", TTL);
    txn.commit(batch).await.expect("unrelated write should not conflict");
}

/// Dropping a transaction without committing leaves the store untouched and
/// does not block later writers.
pub async fn tx_drop_without_commit_is_noop<B: StorageBackend>(backend: &B) {
    clear(backend, &["conf:tx:drop"]).await;
    {
        let txn = backend.watch(&["conf:tx:drop"]).await.expect("watch");
        assert_eq!(txn.get("conf:tx:drop").await.expect("txn get"), None);
    }
    assert_eq!(backend.get("conf:tx:drop").await.expect("get"), None);

    let txn = backend.watch(&["conf:tx:drop"]).await.expect("second watch");
    let mut batch = Batch::new();
    batch.set_with_ttl("conf:tx:drop", "v", TTL);
    txn.commit(batch).await.expect("fresh watch should commit");
}

// ============================================================================
// Concurrent access: thread-safety under parallel access (2 tests)
// ============================================================================

/// Concurrent inserts of distinct members into one set are all retained.
///
/// Requires `B: 'static` so the backend can be shared across spawned tasks
/// via `Arc`.
pub async fn concurrent_zadds_are_all_counted<B: StorageBackend + 'static>(backend: Arc<B>) {
    clear(backend.as_ref(), &["conf:conc:z"]).await;

    let mut handles = Vec::new();
    for task in 0..20 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            for seq in 0..5 {
                let mut batch = Batch::new();
                batch.zadd("conf:conc:z", 1, crate::testutil::make_member(task, seq));
                backend.execute(batch).await.expect("concurrent zadd");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task join");
    }

    assert_eq!(backend.zcard("conf:conc:z").await.expect("zcard"), 100);
}

/// Many writers racing to replace the same observed value: exactly one wins.
///
/// Each writer watches the key, reads it, and commits only if it still holds
/// the initial value. Losers either hit `Conflict` or observe the winner's
/// value before committing.
pub async fn concurrent_watch_exactly_one_winner<B: StorageBackend + 'static>(backend: Arc<B>) {
    clear(backend.as_ref(), &["conf:conc:cas"]).await;
    backend.set_with_ttl("conf:conc:cas", Bytes::from("v0"), TTL).await.expect("seed");

    let mut handles = Vec::new();
    for i in 0u32..10 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move { try_replace_seed(backend.as_ref(), i).await }));
    }

    let mut winners = 0u32;
    for handle in handles {
        if handle.await.expect("task join").expect("watch round trip") {
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one writer should replace the seeded value");
}

async fn try_replace_seed<B: StorageBackend>(backend: &B, writer: u32) -> StorageResult<bool> {
    let txn = backend.watch(&["conf:conc:cas"]).await?;
    if txn.get("conf:conc:cas").await?.as_deref() != Some(b"v0".as_slice()) {
        return Ok(false);
    }
    let mut batch = Batch::new();
    batch.set_with_ttl("conf:conc:cas", format!("writer-{writer}"), TTL);
    match txn.commit(batch).await {
        Ok(_) => Ok(true),
        Err(StorageError::Conflict) => Ok(false),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Health (1 test)
// ============================================================================

/// `health_check` succeeds on a reachable backend.
pub async fn health_check_succeeds<B: StorageBackend>(backend: &B) {
    backend.health_check().await.expect("health_check");
}

// ============================================================================
// Convenience runner: run all conformance tests against a single backend
// ============================================================================

/// Run the full conformance suite against the given backend.
///
/// ```no_run
/// use std::sync::Arc;
/// use distbreaker_storage::conformance;
/// use distbreaker_storage::MemoryBackend;
///
/// #[tokio::test]
/// async fn memory_backend_conformance() {
///     conformance::run_all(Arc::new(MemoryBackend::new())).await;
/// }
/// ```
///
/// For finer-grained control or parallel execution, call individual test
/// functions directly.
pub async fn run_all<B: StorageBackend + 'static>(backend: Arc<B>) {
    // String
    string_get_returns_none_for_missing_key(backend.as_ref()).await;
    string_set_overwrites_existing(backend.as_ref()).await;
    string_delete_is_idempotent(backend.as_ref()).await;
    string_delete_reports_count(backend.as_ref()).await;

    // TTL
    ttl_key_expires(backend.as_ref()).await;
    ttl_pexpire_refreshes_expiry(backend.as_ref()).await;
    ttl_pexpire_on_missing_key_is_noop(backend.as_ref()).await;

    // Sorted set
    zset_missing_key_has_zero_cardinality(backend.as_ref()).await;
    zset_add_is_idempotent_per_member(backend.as_ref()).await;
    zset_remove_member(backend.as_ref()).await;
    zset_range_removal_is_exclusive(backend.as_ref()).await;
    zset_emptied_set_is_removed(backend.as_ref()).await;
    zset_wrong_type_is_reported(backend.as_ref()).await;

    // Batch
    batch_replies_match_commands(backend.as_ref()).await;
    batch_wrong_type_keeps_earlier_commands(backend.as_ref()).await;

    // Transaction
    tx_commit_applies_batch(backend.as_ref()).await;
    tx_concurrent_write_conflicts(backend.as_ref()).await;
    tx_expiry_conflicts(backend.as_ref()).await;
    tx_unwatched_write_does_not_conflict(backend.as_ref()).await;
    tx_drop_without_commit_is_noop(backend.as_ref()).await;

    // Concurrent
    concurrent_zadds_are_all_counted(Arc::clone(&backend)).await;
    concurrent_watch_exactly_one_winner(Arc::clone(&backend)).await;

    // Health
    health_check_succeeds(backend.as_ref()).await;
}
