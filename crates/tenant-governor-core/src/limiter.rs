// crates/tenant-governor-core/src/limiter.rs
// ============================================================================
// Module: Multi-Tenant Rate Limiter
// Description: Sliding-window admission control keyed by tenant, actor, and command.
// Purpose: Keep one tenant or actor from overwhelming the shared backend.
// Dependencies: dashmap, thiserror, tokio, tokio-util, tracing
// ============================================================================

//! ## Overview
//! [`RateLimiter::admit`] evaluates three layered checks in a fixed order and
//! stops at the first failure:
//!
//! 1. cooldown since the actor's last admitted call for the command,
//! 2. the actor's sliding-window ceiling,
//! 3. the tenant-wide sliding-window ceiling for the command.
//!
//! Only a fully admitted call is recorded. Denials leave every window
//! untouched.
//!
//! State lives in a [`DashMap`] keyed by tenant. The shard guard for a tenant
//! is held for the whole purge, compare, and append sequence, so two
//! concurrent calls for one tenant can never both take the last free slot.
//! Nothing inside the guard performs I/O.
//!
//! Counters are process-local and reset on restart.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::identifiers::ActorId;
use crate::identifiers::CommandName;
use crate::identifiers::TenantId;
use crate::policy::PolicyTable;
use crate::policy::RateLimitPolicy;
use crate::window::UsageWindow;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum number of tenants with tracked windows.
pub const DEFAULT_MAX_TENANTS: usize = 65_536;
/// Default maximum number of tracked actors inside one tenant.
pub const DEFAULT_MAX_ACTORS_PER_TENANT: usize = 4_096;
/// Shortest interval accepted by the background sweeper.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Why an invocation was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The actor called the same command too recently.
    Cooldown,
    /// The actor's window ceiling for the command is exhausted.
    ActorLimit,
    /// The tenant-wide window ceiling for the command is exhausted.
    TenantLimit,
}

impl DenyReason {
    /// Stable label used in logs and responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::ActorLimit => "actor_limit",
            Self::TenantLimit => "tenant_limit",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check.
///
/// # Invariants
/// - `allowed == reason.is_none()`.
/// - `retry_after` is zero when allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct AdmissionDecision {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Time until the next admissible call when denied.
    pub retry_after: Duration,
    /// Failing check when denied.
    pub reason: Option<DenyReason>,
}

impl AdmissionDecision {
    /// An admitted decision.
    pub const fn admitted() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
            reason: None,
        }
    }

    /// A denied decision.
    pub const fn denied(reason: DenyReason, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
            reason: Some(reason),
        }
    }

    /// Returns true when the call may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Converts the decision into a `Result` for `?` propagation in handlers.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimited`] when the call was denied.
    pub fn into_result(self) -> Result<(), RateLimited> {
        match self.reason {
            None => Ok(()),
            Some(reason) => Err(RateLimited {
                reason,
                retry_after: self.retry_after,
            }),
        }
    }
}

/// Typed denial surfaced to command handlers.
///
/// Expected and frequent; the governor never retries on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limited ({reason}): retry after {}s", ceil_secs(.retry_after))]
pub struct RateLimited {
    /// Failing check.
    pub reason: DenyReason,
    /// Time until the next admissible call.
    pub retry_after: Duration,
}

impl RateLimited {
    /// Whole seconds to wait, rounded up so a blocked caller never sees zero.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(&self.retry_after)
    }
}

/// Rounds a duration up to whole seconds.
fn ceil_secs(duration: &Duration) -> u64 {
    duration.as_secs().saturating_add(u64::from(duration.subsec_nanos() > 0))
}

// ============================================================================
// SECTION: Inspection Types
// ============================================================================

/// Live usage of one command for one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    /// Live admissions in the actor window.
    pub actor_usage: usize,
    /// Actor ceiling.
    pub actor_limit: u32,
    /// Live admissions in the tenant window.
    pub tenant_usage: usize,
    /// Tenant ceiling.
    pub tenant_limit: u32,
    /// Cooldown in whole seconds.
    pub cooldown_secs: u64,
}

/// Tenant-wide activity summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TenantUsageSummary {
    /// Actors with at least one live admission.
    pub active_actors: usize,
    /// Live admissions summed over every actor window.
    pub recorded_calls: usize,
}

/// Result of a full sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Empty windows dropped.
    pub windows_removed: usize,
    /// Tenants dropped because nothing was left.
    pub tenants_removed: usize,
}

/// Capacity bounds for tracked state.
///
/// # Invariants
/// - Both bounds are at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterLimits {
    /// Maximum tenants tracked at once.
    pub max_tenants: usize,
    /// Maximum actors tracked inside one tenant.
    pub max_actors_per_tenant: usize,
}

impl Default for LimiterLimits {
    fn default() -> Self {
        Self {
            max_tenants: DEFAULT_MAX_TENANTS,
            max_actors_per_tenant: DEFAULT_MAX_ACTORS_PER_TENANT,
        }
    }
}

// ============================================================================
// SECTION: Tenant State
// ============================================================================

/// Window plus cooldown marker for one (actor, command) key.
#[derive(Debug, Default)]
struct ActorWindow {
    /// Admissions inside the actor window.
    window: UsageWindow,
    /// Most recent admission, kept apart from the window for long cooldowns.
    last_admitted: Option<Instant>,
}

impl ActorWindow {
    /// Purges stale entries; returns true when nothing constrains the actor anymore.
    fn purge(&mut self, policy: &RateLimitPolicy, now: Instant) -> bool {
        self.window.purge(now, policy.actor_rate.window);
        let cooling = self
            .last_admitted
            .is_some_and(|last| now.saturating_duration_since(last) < policy.cooldown);
        self.window.is_empty() && !cooling
    }

    /// Most recent instant touching this key.
    fn last_activity(&self) -> Option<Instant> {
        self.last_admitted.max(self.window.latest())
    }
}

/// All windows belonging to one tenant.
#[derive(Debug)]
struct TenantWindows {
    /// Actor windows, keyed by actor then command.
    actors: HashMap<ActorId, HashMap<CommandName, ActorWindow>>,
    /// Tenant-wide windows keyed by command.
    commands: HashMap<CommandName, UsageWindow>,
    /// Latest instant observed for this tenant; evaluation never goes backwards.
    last_activity: Instant,
}

impl TenantWindows {
    /// Creates empty tenant state.
    fn new(now: Instant) -> Self {
        Self {
            actors: HashMap::new(),
            commands: HashMap::new(),
            last_activity: now,
        }
    }

    /// Runs the three checks; returns the first failure.
    fn check(
        &mut self,
        actor: &ActorId,
        command: &CommandName,
        policy: &RateLimitPolicy,
        now: Instant,
    ) -> Option<(DenyReason, Duration)> {
        if let Some(state) = self.actors.get_mut(actor).and_then(|windows| windows.get_mut(command))
        {
            if let Some(last) = state.last_admitted {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < policy.cooldown {
                    return Some((DenyReason::Cooldown, policy.cooldown - elapsed));
                }
            }
            state.window.purge(now, policy.actor_rate.window);
            if state.window.len() >= limit_len(policy.actor_rate.limit) {
                let retry_after = state.window.retry_after(now, policy.actor_rate.window);
                return Some((DenyReason::ActorLimit, retry_after));
            }
        }
        if let Some(window) = self.commands.get_mut(command) {
            window.purge(now, policy.tenant_rate.window);
            if window.len() >= limit_len(policy.tenant_rate.limit) {
                let retry_after = window.retry_after(now, policy.tenant_rate.window);
                return Some((DenyReason::TenantLimit, retry_after));
            }
        }
        None
    }

    /// Appends an admission to the actor and tenant windows.
    fn record(&mut self, actor: &ActorId, command: &CommandName, now: Instant) {
        let state = self
            .actors
            .entry(actor.clone())
            .or_default()
            .entry(command.clone())
            .or_default();
        state.window.record(now);
        state.last_admitted = Some(now);
        self.commands.entry(command.clone()).or_default().record(now);
    }

    /// Purges every window and drops the empty ones; returns the number dropped.
    fn purge(&mut self, policies: &PolicyTable, now: Instant) -> usize {
        let mut removed = 0;
        self.actors.retain(|_, windows| {
            windows.retain(|command, state| {
                let dead = state.purge(policies.resolve(command), now);
                removed += usize::from(dead);
                !dead
            });
            !windows.is_empty()
        });
        self.commands.retain(|command, window| {
            window.purge(now, policies.resolve(command).tenant_rate.window);
            let dead = window.is_empty();
            removed += usize::from(dead);
            !dead
        });
        removed
    }

    /// Frees an actor slot: purge first, then evict the least recently active actor.
    fn make_room_for_actor(
        &mut self,
        tenant: &TenantId,
        policies: &PolicyTable,
        max_actors: usize,
        now: Instant,
    ) {
        self.purge(policies, now);
        if self.actors.len() < max_actors {
            return;
        }
        let victim = self
            .actors
            .iter()
            .min_by_key(|(_, windows)| windows.values().filter_map(ActorWindow::last_activity).max())
            .map(|(actor, _)| actor.clone());
        if let Some(victim) = victim {
            self.actors.remove(&victim);
            warn!(tenant = %tenant, actor = %victim, "actor windows evicted at capacity");
        }
    }

    /// Live usage for one (actor, command) pair.
    fn snapshot(
        &self,
        actor: &ActorId,
        command: &CommandName,
        policy: &RateLimitPolicy,
        now: Instant,
    ) -> UsageSnapshot {
        let actor_usage = self
            .actors
            .get(actor)
            .and_then(|windows| windows.get(command))
            .map_or(0, |state| state.window.live_count(now, policy.actor_rate.window));
        let tenant_usage = self
            .commands
            .get(command)
            .map_or(0, |window| window.live_count(now, policy.tenant_rate.window));
        UsageSnapshot {
            actor_usage,
            actor_limit: policy.actor_rate.limit,
            tenant_usage,
            tenant_limit: policy.tenant_rate.limit,
            cooldown_secs: policy.cooldown.as_secs(),
        }
    }

    /// Returns true when no window is left.
    fn is_empty(&self) -> bool {
        self.actors.is_empty() && self.commands.is_empty()
    }
}

/// Converts a policy limit into a queue length bound.
fn limit_len(limit: u32) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

// ============================================================================
// SECTION: Rate Limiter
// ============================================================================

/// Process-local admission arbiter shared by every command handler.
///
/// # Invariants
/// - Every command resolves to a policy from the immutable table.
/// - Admission for one tenant is serialized by that tenant's shard guard.
/// - Internal capacity pressure evicts idle state; it never denies a call.
#[derive(Debug)]
pub struct RateLimiter {
    /// Immutable policy table.
    policies: PolicyTable,
    /// Capacity bounds for tracked state.
    limits: LimiterLimits,
    /// Per-tenant windows.
    tenants: DashMap<TenantId, TenantWindows>,
}

impl RateLimiter {
    /// Creates a limiter with default capacity bounds.
    #[must_use]
    pub fn new(policies: PolicyTable) -> Self {
        Self::with_limits(policies, LimiterLimits::default())
    }

    /// Creates a limiter with explicit capacity bounds.
    #[must_use]
    pub fn with_limits(policies: PolicyTable, limits: LimiterLimits) -> Self {
        Self {
            policies,
            limits: LimiterLimits {
                max_tenants: limits.max_tenants.max(1),
                max_actors_per_tenant: limits.max_actors_per_tenant.max(1),
            },
            tenants: DashMap::new(),
        }
    }

    /// Returns the policy table.
    #[must_use]
    pub const fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Decides whether the invocation may proceed and records it when admitted.
    pub fn admit(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        command: &CommandName,
    ) -> AdmissionDecision {
        self.evaluate(tenant, actor, command, None)
    }

    /// Same as [`RateLimiter::admit`] with an explicit evaluation instant.
    ///
    /// An instant earlier than one already observed for the tenant is
    /// clamped forward.
    pub fn admit_at(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        command: &CommandName,
        now: Instant,
    ) -> AdmissionDecision {
        self.evaluate(tenant, actor, command, Some(now))
    }

    /// Shared admission path; reads the clock inside the tenant guard when `at` is `None`.
    fn evaluate(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        command: &CommandName,
        at: Option<Instant>,
    ) -> AdmissionDecision {
        let policy = *self.policies.resolve(command);
        let is_new_tenant = !self.tenants.contains_key(tenant);
        if is_new_tenant {
            self.make_room_for_tenant(at.unwrap_or_else(Instant::now));
        }
        let decision = {
            let mut shard = match self.tenants.get_mut(tenant) {
                Some(shard) => shard,
                None => self
                    .tenants
                    .entry(tenant.clone())
                    .or_insert_with(|| TenantWindows::new(at.unwrap_or_else(Instant::now))),
            };
            let now = at.unwrap_or_else(Instant::now).max(shard.last_activity);
            shard.last_activity = now;
            match shard.check(actor, command, &policy, now) {
                Some((reason, retry_after)) => AdmissionDecision::denied(reason, retry_after),
                None => {
                    if !shard.actors.contains_key(actor)
                        && shard.actors.len() >= self.limits.max_actors_per_tenant
                    {
                        shard.make_room_for_actor(
                            tenant,
                            &self.policies,
                            self.limits.max_actors_per_tenant,
                            now,
                        );
                    }
                    shard.record(actor, command, now);
                    AdmissionDecision::admitted()
                }
            }
        };
        if is_new_tenant {
            self.trim_tenants(tenant);
        }
        if let Some(reason) = decision.reason {
            debug!(
                tenant = %tenant,
                actor = %actor,
                command = %command,
                reason = reason.as_str(),
                retry_after_ms = u64::try_from(decision.retry_after.as_millis()).unwrap_or(u64::MAX),
                "admission denied"
            );
        }
        decision
    }

    /// Keeps the tenant map under its bound before a new tenant is inserted.
    fn make_room_for_tenant(&self, now: Instant) {
        if self.tenants.len() < self.limits.max_tenants {
            return;
        }
        self.sweep_at(now);
        if self.tenants.len() < self.limits.max_tenants {
            return;
        }
        self.evict_least_recent_tenant(None);
    }

    /// Restores the tenant bound after an insert.
    ///
    /// The pre-insert check runs outside any shard guard, so concurrent first
    /// calls from distinct tenants can overshoot `max_tenants`; each inserter
    /// trims back here, never evicting the tenant it just admitted.
    fn trim_tenants(&self, keep: &TenantId) {
        while self.tenants.len() > self.limits.max_tenants {
            if !self.evict_least_recent_tenant(Some(keep)) {
                break;
            }
        }
    }

    /// Evicts the least recently active tenant other than `keep`; returns false when none qualifies.
    fn evict_least_recent_tenant(&self, keep: Option<&TenantId>) -> bool {
        let victim = self
            .tenants
            .iter()
            .filter(|entry| Some(entry.key()) != keep)
            .min_by_key(|entry| entry.value().last_activity)
            .map(|entry| entry.key().clone());
        let Some(victim) = victim else {
            return false;
        };
        self.tenants.remove(&victim);
        warn!(tenant = %victim, "tenant windows evicted at capacity");
        true
    }

    /// Live usage of `command` for `actor`.
    #[must_use]
    pub fn usage(&self, tenant: &TenantId, actor: &ActorId, command: &CommandName) -> UsageSnapshot {
        self.usage_at(tenant, actor, command, Instant::now())
    }

    /// Same as [`RateLimiter::usage`] with an explicit evaluation instant.
    #[must_use]
    pub fn usage_at(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        command: &CommandName,
        now: Instant,
    ) -> UsageSnapshot {
        let policy = self.policies.resolve(command);
        match self.tenants.get(tenant) {
            Some(shard) => shard.snapshot(actor, command, policy, now),
            None => TenantWindows::new(now).snapshot(actor, command, policy, now),
        }
    }

    /// Live usage for every command the actor has state for.
    #[must_use]
    pub fn actor_usage(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
    ) -> BTreeMap<CommandName, UsageSnapshot> {
        self.actor_usage_at(tenant, actor, Instant::now())
    }

    /// Same as [`RateLimiter::actor_usage`] with an explicit evaluation instant.
    #[must_use]
    pub fn actor_usage_at(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        now: Instant,
    ) -> BTreeMap<CommandName, UsageSnapshot> {
        let Some(shard) = self.tenants.get(tenant) else {
            return BTreeMap::new();
        };
        let Some(windows) = shard.actors.get(actor) else {
            return BTreeMap::new();
        };
        windows
            .keys()
            .map(|command| {
                let policy = self.policies.resolve(command);
                (command.clone(), shard.snapshot(actor, command, policy, now))
            })
            .collect()
    }

    /// Active actors and live calls for a tenant.
    #[must_use]
    pub fn tenant_summary(&self, tenant: &TenantId) -> TenantUsageSummary {
        self.tenant_summary_at(tenant, Instant::now())
    }

    /// Same as [`RateLimiter::tenant_summary`] with an explicit evaluation instant.
    #[must_use]
    pub fn tenant_summary_at(&self, tenant: &TenantId, now: Instant) -> TenantUsageSummary {
        let Some(shard) = self.tenants.get(tenant) else {
            return TenantUsageSummary::default();
        };
        let mut summary = TenantUsageSummary::default();
        for windows in shard.actors.values() {
            let live: usize = windows
                .iter()
                .map(|(command, state)| {
                    let window = self.policies.resolve(command).actor_rate.window;
                    state.window.live_count(now, window)
                })
                .sum();
            if live > 0 {
                summary.active_actors += 1;
                summary.recorded_calls += live;
            }
        }
        summary
    }

    /// Clears an actor's windows and cooldowns for one command or for all of them.
    ///
    /// Tenant-wide windows are untouched. Returns the number of windows cleared.
    pub fn reset_actor(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        command: Option<&CommandName>,
    ) -> usize {
        let Some(mut shard) = self.tenants.get_mut(tenant) else {
            return 0;
        };
        let cleared = match command {
            Some(command) => {
                let Some(windows) = shard.actors.get_mut(actor) else {
                    return 0;
                };
                let removed = usize::from(windows.remove(command).is_some());
                if windows.is_empty() {
                    shard.actors.remove(actor);
                }
                removed
            }
            None => shard.actors.remove(actor).map_or(0, |windows| windows.len()),
        };
        drop(shard);
        info!(
            tenant = %tenant,
            actor = %actor,
            command = command.map_or("all", CommandName::as_str),
            cleared,
            "actor limits reset"
        );
        cleared
    }

    /// Purges every window and drops empty windows and tenants.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    /// Same as [`RateLimiter::sweep`] with an explicit evaluation instant.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        self.tenants.retain(|_, shard| {
            report.windows_removed += shard.purge(&self.policies, now);
            let keep = !shard.is_empty();
            report.tenants_removed += usize::from(!keep);
            keep
        });
        report
    }

    /// Number of tenants with tracked state.
    #[must_use]
    pub fn tracked_tenants(&self) -> usize {
        self.tenants.len()
    }
}

// ============================================================================
// SECTION: Background Sweeper
// ============================================================================

/// Runs [`RateLimiter::sweep`] every `interval` until `cancel` fires.
///
/// The sweep is a safety net for churn in transient tenant and actor ids;
/// admission itself purges lazily and does not depend on it.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = limiter.sweep();
                    if report.windows_removed > 0 || report.tenants_removed > 0 {
                        debug!(
                            windows_removed = report.windows_removed,
                            tenants_removed = report.tenants_removed,
                            tracked_tenants = limiter.tracked_tenants(),
                            "rate limiter sweep"
                        );
                    }
                }
            }
        }
        debug!("rate limiter sweeper stopped");
    })
}
