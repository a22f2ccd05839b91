// crates/tenant-governor-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Pool Errors
// Description: Error taxonomy for pool configuration, acquisition, and I/O.
// Purpose: Separate retryable backpressure from fatal failures.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`PoolError`] is the single error type of the pool crate. Only
//! [`PoolError::Exhausted`] is backpressure; every other variant is a hard
//! failure for the caller.

use std::time::Duration;

use thiserror::Error;

/// Connection pool errors.
///
/// A connection that fails its validity check is discarded and replaced
/// inside the pool; that condition never reaches callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No connection became available before the deadline.
    #[error("connection pool exhausted after {} ms", .waited.as_millis())]
    Exhausted {
        /// Time spent waiting.
        waited: Duration,
    },
    /// The pool was closed.
    #[error("connection pool is closed")]
    Closed,
    /// `SQLite` engine error.
    #[error("sqlite pool db error: {0}")]
    Db(String),
    /// Pool I/O error.
    #[error("sqlite pool io error: {0}")]
    Io(String),
    /// Invalid pool configuration.
    #[error("sqlite pool invalid config: {0}")]
    Invalid(String),
}

impl PoolError {
    /// Returns true when the caller may retry with backoff (service busy).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
