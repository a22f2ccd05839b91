// crates/tenant-governor-store-sqlite/src/connection.rs
// ============================================================================
// Module: SQLite Connection Setup
// Description: Opens pool connections and runs the liveness probe.
// Purpose: Give every pooled handle the same pragmas and health check.
// Dependencies: rusqlite
// ============================================================================

//! Connection opening and the liveness probe shared by every pool.

use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;

use crate::error::PoolError;
use crate::settings::SqlitePoolConfig;

/// Opens an `SQLite` connection configured for concurrent single-writer use.
pub(crate) fn open_connection(config: &SqlitePoolConfig) -> Result<Connection, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| PoolError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies the pool pragmas.
fn apply_pragmas(connection: &Connection, config: &SqlitePoolConfig) -> Result<(), PoolError> {
    let settings = &config.settings;
    connection
        .busy_timeout(Duration::from_millis(settings.busy_timeout_ms))
        .map_err(|err| PoolError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", settings.journal_mode.pragma_value()))
        .map_err(|err| PoolError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", settings.sync_mode.pragma_value()))
        .map_err(|err| PoolError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA cache_size = {};", settings.cache_size_pages))
        .map_err(|err| PoolError::Db(err.to_string()))?;
    connection
        .execute_batch("PRAGMA temp_store = MEMORY;")
        .map_err(|err| PoolError::Db(err.to_string()))?;
    Ok(())
}

/// Trivial round trip proving the handle still reaches the database.
pub(crate) fn probe(connection: &Connection) -> bool {
    connection.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok_and(|value| value == 1)
}
