// crates/tenant-governor-store-sqlite/src/pool.rs
// ============================================================================
// Module: SQLite Connection Pool
// Description: Bounded async pool with lazy growth, validity checks, and idle eviction.
// Purpose: Hand out healthy connections without exhausting file handles or hanging.
// Dependencies: rusqlite, serde, tokio, tokio-util, tracing
// ============================================================================

//! ## Overview
//! A [`ConnectionPool`] owns every connection for one database path. Idle
//! connections wait in a FIFO queue; checked-out connections are tracked by
//! id in an active set. Both live under one pool-scoped mutex together with
//! the count of connections currently being opened, which keeps
//! `idle + active + opening <= max_connections` at every observation point.
//!
//! [`ConnectionPool::acquire`] pops and validates an idle connection, opens a
//! new one when there is headroom, or waits for a release. Waiting is bounded
//! by a deadline and surfaces as [`PoolError::Exhausted`]. Dropping the
//! acquire future abandons the request without leaking capacity.
//!
//! A background task evicts connections idle for longer than `max_idle`
//! while keeping at least the warm floor open.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::connection::open_connection;
use crate::connection::probe;
use crate::error::PoolError;
use crate::settings::SqlitePoolConfig;
use crate::settings::ensure_parent_dir;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Wait bound substituted when a timeout does not fit in an [`Instant`].
const UNBOUNDED_WAIT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// ============================================================================
// SECTION: Stats
// ============================================================================

/// Point-in-time pool statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Database path served by the pool.
    pub path: PathBuf,
    /// Connection ceiling.
    pub max_connections: usize,
    /// Connections protected from idle eviction.
    pub warm_floor: usize,
    /// Idle connections ready for hand-out.
    pub available: usize,
    /// Connections currently checked out.
    pub active: usize,
    /// Connections opened over the pool lifetime.
    pub total_created: u64,
    /// Acquire calls.
    pub total_requests: u64,
    /// Acquires served from the idle queue.
    pub pool_hits: u64,
    /// Acquires served by opening a new connection.
    pub pool_misses: u64,
    /// Connections discarded as invalid.
    pub invalidated: u64,
    /// Connections closed by idle eviction.
    pub evicted: u64,
    /// Acquires that hit their deadline.
    pub exhausted: u64,
    /// `active / max_connections`.
    pub utilization: f64,
    /// `pool_hits / max(1, total_requests)`.
    pub efficiency: f64,
}

/// Monotonic pool counters.
#[derive(Debug, Default)]
struct PoolCounters {
    /// Connections opened.
    total_created: AtomicU64,
    /// Acquire calls.
    total_requests: AtomicU64,
    /// Idle-queue hand-outs.
    pool_hits: AtomicU64,
    /// Fresh-connection hand-outs.
    pool_misses: AtomicU64,
    /// Invalid connections discarded.
    invalidated: AtomicU64,
    /// Idle connections evicted.
    evicted: AtomicU64,
    /// Deadline failures.
    exhausted: AtomicU64,
}

/// Increments a counter.
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Reads a counter.
fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Ratio helper for stats; returns zero for an empty denominator.
#[allow(clippy::cast_precision_loss, reason = "Stats ratios tolerate rounding on huge counts.")]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

// ============================================================================
// SECTION: Pool State
// ============================================================================

/// Bookkeeping carried by every pooled connection.
#[derive(Debug, Clone, Copy)]
struct ConnectionMeta {
    /// Pool-unique connection id.
    id: u64,
    /// Open instant.
    created_at: Instant,
    /// Last time the connection went back to the idle queue.
    last_returned: Instant,
    /// Number of hand-outs.
    use_count: u64,
}

/// Idle connection waiting in the queue.
struct IdleConnection {
    /// Live `SQLite` handle.
    connection: Connection,
    /// Connection bookkeeping.
    meta: ConnectionMeta,
}

/// Mutable pool state guarded by one mutex.
///
/// # Invariants
/// - `idle.len() + active.len() + opening <= max_connections`.
/// - An id is either in `idle`, in `active`, or gone.
#[derive(Default)]
struct PoolState {
    /// Idle connections, oldest release at the front.
    idle: VecDeque<IdleConnection>,
    /// Ids of checked-out connections.
    active: HashSet<u64>,
    /// Connections currently being opened.
    opening: usize,
    /// Set once by `close`.
    closed: bool,
}

impl PoolState {
    /// Connections counted against the ceiling.
    fn size(&self) -> usize {
        self.idle.len() + self.active.len() + self.opening
    }
}

/// Outcome of one checkout attempt under the lock.
enum Checkout {
    /// An idle connection, already moved to the active set.
    Idle(IdleConnection),
    /// Headroom reserved for a new connection.
    Open(OpeningSlot),
    /// The pool is saturated.
    Wait,
}

/// State shared by the pool handle, scoped connections, and the eviction task.
struct PoolShared {
    /// Pool configuration.
    config: SqlitePoolConfig,
    /// Connections protected from idle eviction.
    warm_floor: usize,
    /// Idle queue, active set, and reservations.
    state: Mutex<PoolState>,
    /// Signalled whenever capacity may have been freed.
    available: Notify,
    /// Usage counters.
    counters: PoolCounters,
    /// Next connection id.
    next_id: AtomicU64,
}

impl PoolShared {
    /// Locks the state for operations that must fail on a poisoned mutex.
    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>, PoolError> {
        self.state.lock().map_err(|_| PoolError::Io("pool state mutex poisoned".to_string()))
    }

    /// Locks the state for cleanup paths that must always make progress.
    fn lock_state_lossy(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Database path for logs.
    fn path(&self) -> &Path {
        &self.config.path
    }

    /// Takes an idle connection or reserves room for a new one.
    fn checkout(self: &Arc<Self>) -> Result<Checkout, PoolError> {
        let mut state = self.lock_state()?;
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(idle) = state.idle.pop_front() {
            state.active.insert(idle.meta.id);
            return Ok(Checkout::Idle(idle));
        }
        if state.size() < self.config.settings.max_connections {
            state.opening += 1;
            return Ok(Checkout::Open(OpeningSlot {
                shared: Arc::clone(self),
                armed: true,
            }));
        }
        Ok(Checkout::Wait)
    }

    /// Opens a connection on the blocking pool.
    async fn open_new(self: &Arc<Self>) -> Result<(Connection, ConnectionMeta), PoolError> {
        let shared = Arc::clone(self);
        let connection = tokio::task::spawn_blocking(move || open_connection(&shared.config))
            .await
            .map_err(|err| PoolError::Io(err.to_string()))??;
        let now = Instant::now();
        let meta = ConnectionMeta {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            created_at: now,
            last_returned: now,
            use_count: 0,
        };
        bump(&self.counters.total_created, 1);
        debug!(path = %self.path().display(), connection_id = meta.id, "sqlite connection opened");
        Ok((connection, meta))
    }

    /// Returns true when an idle connection may be handed out.
    ///
    /// The `SELECT 1` check runs inline on the calling task: it reads no
    /// pages and takes no file locks, so it never waits on `busy_timeout`
    /// even while another process holds the write lock. Keeping it inline
    /// also means a cancelled acquire never strands a connection off-pool.
    fn is_valid(&self, idle: &IdleConnection, now: Instant) -> bool {
        let max_age = self.config.settings.max_idle.saturating_mul(2);
        if now.saturating_duration_since(idle.meta.created_at) > max_age {
            return false;
        }
        probe(&idle.connection)
    }

    /// Takes back a checked-out connection.
    fn release(&self, meta: ConnectionMeta, connection: Connection, invalid: bool) {
        let mut state = self.lock_state_lossy();
        state.active.remove(&meta.id);
        let reusable = !invalid
            && !state.closed
            && state.size() < self.config.settings.max_connections;
        if reusable {
            state.idle.push_back(IdleConnection {
                connection,
                meta: ConnectionMeta {
                    last_returned: Instant::now(),
                    ..meta
                },
            });
            drop(state);
        } else {
            drop(state);
            drop(connection);
            if invalid {
                bump(&self.counters.invalidated, 1);
                warn!(
                    path = %self.path().display(),
                    connection_id = meta.id,
                    "connection reported invalid; closed on release"
                );
            }
        }
        self.available.notify_one();
    }

    /// Drops a checked-out connection that failed validation.
    fn discard(&self, meta: ConnectionMeta, connection: Connection) {
        self.lock_state_lossy().active.remove(&meta.id);
        drop(connection);
        bump(&self.counters.invalidated, 1);
        warn!(
            path = %self.path().display(),
            connection_id = meta.id,
            use_count = meta.use_count,
            "discarding invalid pooled connection"
        );
        self.available.notify_one();
    }

    /// Closes idle connections past `max_idle` while the pool stays above the warm floor.
    fn evict_idle_at(&self, now: Instant) -> usize {
        let max_idle = self.config.settings.max_idle;
        let mut evicted = Vec::new();
        {
            let mut state = self.lock_state_lossy();
            let mut total = state.idle.len() + state.active.len();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            while let Some(idle) = state.idle.pop_front() {
                let stale = now.saturating_duration_since(idle.meta.last_returned) > max_idle;
                if stale && total > self.warm_floor {
                    total -= 1;
                    evicted.push(idle);
                } else {
                    kept.push_back(idle);
                }
            }
            state.idle = kept;
        }
        let count = evicted.len();
        drop(evicted);
        if count > 0 {
            bump(&self.counters.evicted, u64::try_from(count).unwrap_or(u64::MAX));
            info!(path = %self.path().display(), evicted = count, "idle connections evicted");
        }
        count
    }
}

/// Reservation for a connection being opened.
///
/// Dropping an armed slot returns the headroom, so a cancelled acquire never
/// leaks capacity.
struct OpeningSlot {
    /// Pool the reservation belongs to.
    shared: Arc<PoolShared>,
    /// Cleared once the reservation is converted into an active connection.
    armed: bool,
}

impl OpeningSlot {
    /// Converts the reservation into an active connection.
    fn activate(mut self, id: u64) -> Result<(), PoolError> {
        let mut state = self.shared.lock_state()?;
        state.opening = state.opening.saturating_sub(1);
        self.armed = false;
        if state.closed {
            drop(state);
            self.shared.available.notify_one();
            return Err(PoolError::Closed);
        }
        state.active.insert(id);
        Ok(())
    }
}

impl Drop for OpeningSlot {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.shared.lock_state_lossy();
            state.opening = state.opening.saturating_sub(1);
            drop(state);
            self.shared.available.notify_one();
        }
    }
}

// ============================================================================
// SECTION: Scoped Connection
// ============================================================================

/// Connection checked out of a pool.
///
/// Returned to the pool exactly once, on [`ScopedConnection::release`] or
/// drop. A caller that hits a mid-use failure should call
/// [`ScopedConnection::mark_invalid`] so the connection is closed instead of
/// reused.
pub struct ScopedConnection {
    /// Live handle; taken on release.
    connection: Option<Connection>,
    /// Bookkeeping for this hand-out.
    meta: ConnectionMeta,
    /// Owning pool.
    shared: Arc<PoolShared>,
    /// Set by `mark_invalid`.
    invalid: bool,
}

impl ScopedConnection {
    /// Pool-unique connection id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.meta.id
    }

    /// How many times this connection has been handed out, this time included.
    #[must_use]
    pub const fn use_count(&self) -> u64 {
        self.meta.use_count
    }

    /// Flags the connection so release closes it.
    pub const fn mark_invalid(&mut self) {
        self.invalid = true;
    }

    /// Returns the connection to the pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for ScopedConnection {
    type Target = Connection;

    #[allow(
        clippy::expect_used,
        reason = "The handle is only taken in drop, after which deref is unreachable."
    )]
    fn deref(&self) -> &Connection {
        self.connection.as_ref().expect("scoped connection used after release")
    }
}

impl fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("id", &self.meta.id)
            .field("use_count", &self.meta.use_count)
            .field("invalid", &self.invalid)
            .finish_non_exhaustive()
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.shared.release(self.meta, connection, self.invalid);
        }
    }
}

// ============================================================================
// SECTION: Connection Pool
// ============================================================================

/// Handle to the background eviction task.
struct EvictionTask {
    /// Stops the task.
    cancel: CancellationToken,
    /// Task join handle.
    handle: JoinHandle<()>,
}

/// Bounded pool of `SQLite` connections for one database path.
///
/// # Invariants
/// - `available + active <= max_connections` at every observation point.
/// - A connection is handed to at most one caller at a time.
pub struct ConnectionPool {
    /// State shared with scoped connections and the eviction task.
    shared: Arc<PoolShared>,
    /// Eviction task, taken by `close`.
    eviction: Mutex<Option<EvictionTask>>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.shared.config.path)
            .field("max_connections", &self.shared.config.settings.max_connections)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Opens a pool, pre-warms the warm floor, and starts idle eviction.
    ///
    /// Failing to open the first connection is fatal; later pre-warm
    /// failures are logged and left to lazy growth.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] when the configuration is invalid or the
    /// database cannot be opened.
    pub async fn open(config: SqlitePoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        ensure_parent_dir(&config.path)?;
        let warm_floor = config.settings.warm_floor();
        let shared = Arc::new(PoolShared {
            config,
            warm_floor,
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
            counters: PoolCounters::default(),
            next_id: AtomicU64::new(1),
        });
        for index in 0 .. warm_floor {
            match shared.open_new().await {
                Ok((connection, meta)) => {
                    shared.lock_state()?.idle.push_back(IdleConnection {
                        connection,
                        meta,
                    });
                }
                Err(err) if index == 0 => return Err(err),
                Err(err) => {
                    warn!(
                        path = %shared.path().display(),
                        error = %err,
                        "pre-warm stopped early"
                    );
                    break;
                }
            }
        }
        let cancel = CancellationToken::new();
        let handle = spawn_eviction(Arc::clone(&shared), cancel.clone());
        info!(
            path = %shared.path().display(),
            max_connections = shared.config.settings.max_connections,
            warm_floor,
            "connection pool opened"
        );
        Ok(Self {
            shared,
            eviction: Mutex::new(Some(EvictionTask {
                cancel,
                handle,
            })),
        })
    }

    /// Database path served by the pool.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.shared.path()
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &SqlitePoolConfig {
        &self.shared.config
    }

    /// Acquires a connection within the configured `acquire_timeout`.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::acquire_until`].
    pub async fn acquire(&self) -> Result<ScopedConnection, PoolError> {
        self.acquire_timeout(self.shared.config.settings.acquire_timeout).await
    }

    /// Acquires a connection, waiting at most `timeout`.
    ///
    /// A `timeout` past the clock's range (such as [`Duration::MAX`]) waits
    /// for a release indefinitely.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::acquire_until`].
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<ScopedConnection, PoolError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(UNBOUNDED_WAIT))
            .unwrap_or(now);
        self.acquire_until(deadline).await
    }

    /// Acquires a connection, waiting until `deadline` at the latest.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when the deadline passes while the
    /// pool is saturated, [`PoolError::Closed`] after `close`, and
    /// [`PoolError::Db`] when a new connection cannot be opened.
    pub async fn acquire_until(&self, deadline: Instant) -> Result<ScopedConnection, PoolError> {
        let shared = &self.shared;
        bump(&shared.counters.total_requests, 1);
        let started = Instant::now();
        loop {
            let notified = shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match shared.checkout()? {
                Checkout::Idle(idle) => {
                    if shared.is_valid(&idle, Instant::now()) {
                        bump(&shared.counters.pool_hits, 1);
                        return Ok(self.hand_out(idle.connection, idle.meta));
                    }
                    shared.discard(idle.meta, idle.connection);
                }
                Checkout::Open(slot) => {
                    let (connection, meta) = shared.open_new().await?;
                    slot.activate(meta.id)?;
                    bump(&shared.counters.pool_misses, 1);
                    return Ok(self.hand_out(connection, meta));
                }
                Checkout::Wait => {
                    let now = Instant::now();
                    if now >= deadline {
                        bump(&shared.counters.exhausted, 1);
                        let waited = now.saturating_duration_since(started);
                        warn!(
                            path = %shared.path().display(),
                            waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                            "connection pool exhausted"
                        );
                        return Err(PoolError::Exhausted {
                            waited,
                        });
                    }
                    let wait = deadline
                        .saturating_duration_since(now)
                        .min(shared.config.settings.retry_interval);
                    let _woken = tokio::time::timeout(wait, notified).await;
                }
            }
        }
    }

    /// Wraps a connection that is already in the active set.
    fn hand_out(&self, connection: Connection, meta: ConnectionMeta) -> ScopedConnection {
        ScopedConnection {
            connection: Some(connection),
            meta: ConnectionMeta {
                use_count: meta.use_count.saturating_add(1),
                ..meta
            },
            shared: Arc::clone(&self.shared),
            invalid: false,
        }
    }

    /// Runs one eviction pass as of `now`; returns the number of connections closed.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        self.shared.evict_idle_at(now)
    }

    /// Connections protected from idle eviction.
    #[must_use]
    pub fn warm_floor(&self) -> usize {
        self.shared.warm_floor
    }

    /// Returns true once `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock_state_lossy().closed
    }

    /// Returns a snapshot of pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        let (available, active) = {
            let state = self.shared.lock_state_lossy();
            (state.idle.len(), state.active.len())
        };
        let counters = &self.shared.counters;
        let max_connections = self.shared.config.settings.max_connections;
        let total_requests = read(&counters.total_requests);
        let pool_hits = read(&counters.pool_hits);
        PoolStatsSnapshot {
            path: self.shared.config.path.clone(),
            max_connections,
            warm_floor: self.shared.warm_floor,
            available,
            active,
            total_created: read(&counters.total_created),
            total_requests,
            pool_hits,
            pool_misses: read(&counters.pool_misses),
            invalidated: read(&counters.invalidated),
            evicted: read(&counters.evicted),
            exhausted: read(&counters.exhausted),
            utilization: ratio(
                u64::try_from(active).unwrap_or(u64::MAX),
                u64::try_from(max_connections).unwrap_or(u64::MAX),
            ),
            efficiency: ratio(pool_hits, total_requests.max(1)),
        }
    }

    /// Stops eviction, closes idle connections, and rejects further acquires.
    ///
    /// Connections still checked out are closed when released. Calling
    /// `close` again is a no-op.
    pub async fn close(&self) {
        let task = self.eviction.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                warn!(path = %self.path().display(), error = %err, "eviction task failed");
            }
        }
        let (idle, was_closed) = {
            let mut state = self.shared.lock_state_lossy();
            let was_closed = state.closed;
            state.closed = true;
            (std::mem::take(&mut state.idle), was_closed)
        };
        let closed = idle.len();
        drop(idle);
        self.shared.available.notify_waiters();
        if !was_closed {
            info!(path = %self.path().display(), closed, "connection pool closed");
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        let task = self.eviction.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.cancel.cancel();
        }
    }
}

/// Spawns the periodic idle-eviction loop.
fn spawn_eviction(shared: Arc<PoolShared>, cancel: CancellationToken) -> JoinHandle<()> {
    let interval = shared.config.settings.eviction_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    shared.evict_idle_at(Instant::now());
                }
            }
        }
        debug!(path = %shared.path().display(), "eviction task stopped");
    })
}
