// crates/tenant-governor-store-sqlite/src/registry.rs
// ============================================================================
// Module: SQLite Pool Registry
// Description: One connection pool per database path.
// Purpose: Make every caller addressing the same database share one pool.
// Dependencies: tokio, tracing
// ============================================================================

//! ## Overview
//! [`PoolRegistry`] lazily creates a [`ConnectionPool`] the first time a path
//! is requested and hands the cached instance to every later caller. Each path
//! owns a [`OnceCell`]: concurrent first use of one path opens a single pool,
//! while the registry map itself is only locked long enough to find the cell,
//! so a slow open never stalls lookups of other paths. Paths are compared as
//! given; callers should pass the same spelling for the same database.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::PoolError;
use crate::pool::ConnectionPool;
use crate::pool::PoolStatsSnapshot;
use crate::settings::PoolSettings;
use crate::settings::SqlitePoolConfig;

/// Slot holding the pool for one path once it has opened.
type PoolCell = Arc<OnceCell<Arc<ConnectionPool>>>;

/// Keyed registry of connection pools.
#[derive(Debug)]
pub struct PoolRegistry {
    /// Settings applied to every pool created through [`PoolRegistry::get_pool`].
    defaults: PoolSettings,
    /// Pool cells keyed by database path; a cell is empty while its pool opens.
    pools: Mutex<HashMap<PathBuf, PoolCell>>,
}

impl PoolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(defaults: PoolSettings) -> Self {
        Self {
            defaults,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Settings used for pools created by [`PoolRegistry::get_pool`].
    #[must_use]
    pub const fn defaults(&self) -> &PoolSettings {
        &self.defaults
    }

    /// Returns the pool for `path`, creating it with `max_connections` on first use.
    ///
    /// `max_connections` only applies when the pool is created; an existing
    /// pool keeps its original ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] when the pool has to be created and cannot be opened.
    pub async fn get_pool(
        &self,
        path: impl AsRef<Path>,
        max_connections: usize,
    ) -> Result<Arc<ConnectionPool>, PoolError> {
        let settings = self.defaults.clone().with_max_connections(max_connections);
        self.get_pool_with(SqlitePoolConfig::new(path.as_ref(), settings)).await
    }

    /// Returns the pool for `config.path`, creating it from `config` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] when the pool has to be created and cannot be opened.
    pub async fn get_pool_with(
        &self,
        config: SqlitePoolConfig,
    ) -> Result<Arc<ConnectionPool>, PoolError> {
        let path = config.path.clone();
        let cell = {
            let mut pools = self.pools.lock().await;
            Arc::clone(pools.entry(path.clone()).or_default())
        };
        let opened = cell
            .get_or_try_init(|| async {
                let pool = ConnectionPool::open(config).await?;
                info!(path = %path.display(), "pool registered");
                Ok::<_, PoolError>(Arc::new(pool))
            })
            .await;
        match opened {
            Ok(pool) => Ok(Arc::clone(pool)),
            Err(err) => {
                self.forget_failed(&path, &cell).await;
                Err(err)
            }
        }
    }

    /// Drops the empty cell left by a failed open.
    ///
    /// A cell another caller has since filled or replaced stays.
    async fn forget_failed(&self, path: &Path, cell: &PoolCell) {
        let mut pools = self.pools.lock().await;
        let stale = pools
            .get(path)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if stale {
            pools.remove(path);
        }
    }

    /// Statistics for every registered pool, keyed by path.
    pub async fn all_stats(&self) -> BTreeMap<PathBuf, PoolStatsSnapshot> {
        self.pools
            .lock()
            .await
            .iter()
            .filter_map(|(path, cell)| cell.get().map(|pool| (path.clone(), pool.stats())))
            .collect()
    }

    /// Number of registered pools; pools still opening are not counted.
    pub async fn len(&self) -> usize {
        self.pools.lock().await.values().filter(|cell| cell.initialized()).count()
    }

    /// Returns true when no pool is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Closes every registered pool and removes it from the registry.
    ///
    /// Safe to call more than once. A later `get_pool` opens a fresh pool.
    /// Pools still opening are left in place for their callers.
    pub async fn close_all(&self) {
        let pools: Vec<Arc<ConnectionPool>> = {
            let mut guard = self.pools.lock().await;
            let opened: Vec<PathBuf> = guard
                .iter()
                .filter(|(_, cell)| cell.initialized())
                .map(|(path, _)| path.clone())
                .collect();
            opened
                .into_iter()
                .filter_map(|path| guard.remove(&path))
                .filter_map(|cell| cell.get().cloned())
                .collect()
        };
        let count = pools.len();
        for pool in pools {
            pool.close().await;
        }
        if count > 0 {
            info!(pools = count, "all pools closed");
        }
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new(PoolSettings::default())
    }
}
