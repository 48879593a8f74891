//! Shared test utilities for storage backend testing.
//!
//! This module provides helpers for generating sorted-set members and
//! asserting on [`StorageResult`](crate::error::StorageResult) values. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! distbreaker-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use distbreaker_storage::testutil::make_member;
//! ```

/// Create a sorted-set member tagged with a task ID and sequence number.
///
/// Produces members like `"task3-m042"`. Useful for concurrent tests where
/// every writer must insert a distinct member.
#[must_use]
pub fn make_member(task: usize, seq: usize) -> String {
    format!("task{task}-m{seq:03}")
}

/// Assert that a [`StorageResult`](crate::error::StorageResult) is a
/// [`StorageError::Conflict`](crate::error::StorageError::Conflict).
///
/// The result expression is evaluated once.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use distbreaker_storage::assert_conflict;
/// use distbreaker_storage::error::{StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::Conflict);
/// assert_conflict!(result);
/// ```
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        $crate::assert_conflict!($result, "assertion failed");
    };
    ($result:expr, $msg:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::StorageError::Conflict)),
            "{}: expected StorageError::Conflict, got: {:?}",
            $msg,
            result,
        );
    }};
}

/// Assert that a [`StorageResult`](crate::error::StorageResult) is a
/// [`StorageError::WrongType`](crate::error::StorageError::WrongType).
///
/// The result expression is evaluated once.
#[macro_export]
macro_rules! assert_wrong_type {
    ($result:expr) => {
        $crate::assert_wrong_type!($result, "assertion failed");
    };
    ($result:expr, $msg:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::StorageError::WrongType { .. })),
            "{}: expected StorageError::WrongType, got: {:?}",
            $msg,
            result,
        );
    }};
}
