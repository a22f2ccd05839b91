// crates/tenant-governor-store-sqlite/src/settings.rs
// ============================================================================
// Module: SQLite Pool Settings
// Description: Pool sizing, timing, and pragma configuration.
// Purpose: Describe one pool per database path and validate it before open.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`PoolSettings`] carries every pool knob except the database path, so a
//! registry can stamp out one [`SqlitePoolConfig`] per path from a shared
//! template. Validation is fail-closed: a bad path or out-of-range value is
//! reported before any connection is opened.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::PoolError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum connections per pool.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
/// Hard upper bound on connections per pool.
pub const MAX_POOL_CONNECTIONS: usize = 64;
/// Default idle age after which a pooled connection may be evicted.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(300);
/// Default fraction of `max_connections` kept warm.
pub const DEFAULT_WARM_FRACTION: f64 = 0.25;
/// Default deadline for [`crate::ConnectionPool::acquire`].
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default wait between availability re-checks while saturated.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Default interval of the background eviction pass.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);
/// Default busy timeout (ms).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;
/// Default page cache size.
pub const DEFAULT_CACHE_SIZE_PAGES: i64 = 10_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Pragma Modes
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (readers do not block the writer).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    Full,
    /// Normal synchronous mode (safe with WAL, fewer fsyncs).
    #[default]
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Pool settings shared by every database path.
///
/// # Invariants
/// - `max_connections` is in `1..=MAX_POOL_CONNECTIONS` once validated.
/// - `warm_fraction` is finite and in `[0, 1]`.
/// - Every duration is non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    /// Upper bound on idle plus active connections.
    pub max_connections: usize,
    /// Idle age after which a connection may be evicted; twice this is the maximum connection age.
    pub max_idle: Duration,
    /// Fraction of `max_connections` pre-warmed and kept through eviction.
    pub warm_fraction: f64,
    /// Default deadline for `acquire`.
    pub acquire_timeout: Duration,
    /// Longest single wait before re-checking availability.
    pub retry_interval: Duration,
    /// Interval of the background eviction pass.
    pub eviction_interval: Duration,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    pub sync_mode: SqliteSyncMode,
    /// `SQLite` page cache size (`PRAGMA cache_size`).
    pub cache_size_pages: i64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_idle: DEFAULT_MAX_IDLE,
            warm_fraction: DEFAULT_WARM_FRACTION,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            cache_size_pages: DEFAULT_CACHE_SIZE_PAGES,
        }
    }
}

impl PoolSettings {
    /// Returns a copy with a different connection ceiling.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Number of connections pre-warmed and protected from idle eviction.
    ///
    /// Computed as `max(1, floor(max_connections * warm_fraction))` and never
    /// more than `max_connections`.
    #[must_use]
    pub fn warm_floor(&self) -> usize {
        let ceiling = self.max_connections.clamp(1, MAX_POOL_CONNECTIONS);
        let ceiling_u32 = u32::try_from(ceiling).unwrap_or(u32::MAX);
        let target = f64::from(ceiling_u32) * self.warm_fraction;
        let floor = (1 ..= ceiling_u32).rev().find(|count| f64::from(*count) <= target).unwrap_or(0);
        usize::try_from(floor).unwrap_or(ceiling).clamp(1, ceiling)
    }

    /// Validates sizing and timing values.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 || self.max_connections > MAX_POOL_CONNECTIONS {
            return Err(PoolError::Invalid(format!(
                "max_connections out of range: {} (1..={MAX_POOL_CONNECTIONS})",
                self.max_connections
            )));
        }
        if !self.warm_fraction.is_finite() || !(0.0 ..= 1.0).contains(&self.warm_fraction) {
            return Err(PoolError::Invalid(
                "warm_fraction must be between 0 and 1".to_string(),
            ));
        }
        for (name, value) in [
            ("max_idle", self.max_idle),
            ("acquire_timeout", self.acquire_timeout),
            ("retry_interval", self.retry_interval),
            ("eviction_interval", self.eviction_interval),
        ] {
            if value.is_zero() {
                return Err(PoolError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

/// Full configuration of one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlitePoolConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Sizing, timing, and pragma settings.
    pub settings: PoolSettings,
}

impl SqlitePoolConfig {
    /// Creates a configuration from a path and settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, settings: PoolSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    /// Validates the path and the settings.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Invalid`] when the path or settings are unusable.
    pub fn validate(&self) -> Result<(), PoolError> {
        validate_pool_path(&self.path)?;
        self.settings.validate()
    }
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Ensures the parent directory for the database exists.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), PoolError> {
    let Some(parent) = path.parent() else {
        return Err(PoolError::Io("database path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| PoolError::Io(err.to_string()))
}

/// Validates database paths for safety limits.
fn validate_pool_path(path: &Path) -> Result<(), PoolError> {
    if path.as_os_str().is_empty() {
        return Err(PoolError::Invalid("database path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(PoolError::Invalid("database path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(PoolError::Invalid(
                "database path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(PoolError::Invalid(
            "database path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
