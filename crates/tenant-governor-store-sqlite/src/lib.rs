// crates/tenant-governor-store-sqlite/src/lib.rs
// ============================================================================
// Module: Tenant Governor SQLite Pool Library
// Description: Public API surface for the SQLite connection pool.
// Purpose: Expose pool settings, the pool, scoped connections, and the registry.
// Dependencies: crate::{settings, error, pool, registry}
// ============================================================================

//! ## Overview
//! Bounded, health-checked access to embedded `SQLite` databases. Command
//! handlers obtain a [`ScopedConnection`] from the [`ConnectionPool`] of the
//! database they need (usually through a [`PoolRegistry`]) and drop it when
//! their database work is done.
//!
//! The pool arbitrates access and checks health; it does not add write
//! parallelism. `SQLite` serializes writers, so ceilings should stay small.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod connection;
pub mod error;
pub mod pool;
pub mod registry;
pub mod settings;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::PoolError;
pub use pool::ConnectionPool;
pub use pool::PoolStatsSnapshot;
pub use pool::ScopedConnection;
pub use registry::PoolRegistry;
pub use settings::MAX_POOL_CONNECTIONS;
pub use settings::PoolSettings;
pub use settings::SqliteJournalMode;
pub use settings::SqlitePoolConfig;
pub use settings::SqliteSyncMode;
