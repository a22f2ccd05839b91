// crates/tenant-governor-core/src/policy.rs
// ============================================================================
// Module: Rate Limit Policy Table
// Description: Immutable per-command admission policies with a fallback entry.
// Purpose: Guarantee every command resolves to a bounded policy.
// Dependencies: thiserror, tracing
// ============================================================================

//! ## Overview
//! A [`PolicyTable`] maps command names to [`RateLimitPolicy`] values and
//! always carries a default entry. Lookups never yield "unlimited": a command
//! without an explicit entry resolves to the default, and a table assembled
//! without a default falls back to [`RateLimitPolicy::most_restrictive`].
//! Tables are built once at startup and never mutated while serving.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::identifiers::CommandName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum admissions a single rate spec may allow per window.
pub const MAX_RATE_LIMIT: u32 = 100_000;
/// Shortest accepted sliding window.
pub const MIN_WINDOW: Duration = Duration::from_secs(1);
/// Longest accepted sliding window (24 hours).
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
/// Longest accepted cooldown (24 hours).
pub const MAX_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// SECTION: Types
// ============================================================================

/// A ceiling of `limit` admissions within a trailing `window`.
///
/// # Invariants
/// - `limit >= 1` and `window >= MIN_WINDOW` once validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    /// Maximum admissions inside one window.
    pub limit: u32,
    /// Trailing window length.
    pub window: Duration,
}

impl RateSpec {
    /// Creates a rate spec from a limit and a window in seconds.
    #[must_use]
    pub const fn per_secs(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Validates the spec bounds; `scope` names the spec in error messages.
    fn validate(&self, command: &str, scope: &'static str) -> Result<(), PolicyError> {
        if self.limit == 0 || self.limit > MAX_RATE_LIMIT {
            return Err(PolicyError::LimitOutOfRange {
                command: command.to_string(),
                scope,
                limit: self.limit,
            });
        }
        if self.window < MIN_WINDOW || self.window > MAX_WINDOW {
            return Err(PolicyError::WindowOutOfRange {
                command: command.to_string(),
                scope,
                window_secs: self.window.as_secs(),
            });
        }
        Ok(())
    }
}

/// Admission policy for one command.
///
/// # Invariants
/// - Immutable after construction; shared by every tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Per-actor ceiling for the command.
    pub actor_rate: RateSpec,
    /// Per-tenant ceiling for the command (all actors combined).
    pub tenant_rate: RateSpec,
    /// Minimum delay between two admitted calls from one actor.
    pub cooldown: Duration,
}

impl RateLimitPolicy {
    /// Builds a policy from its three parts.
    #[must_use]
    pub const fn new(actor_rate: RateSpec, tenant_rate: RateSpec, cooldown: Duration) -> Self {
        Self {
            actor_rate,
            tenant_rate,
            cooldown,
        }
    }

    /// Built-in fallback: 10 calls/60s per actor, 50 calls/60s per tenant, 5s cooldown.
    #[must_use]
    pub const fn baseline() -> Self {
        Self::new(RateSpec::per_secs(10, 60), RateSpec::per_secs(50, 60), Duration::from_secs(5))
    }

    /// Tightest policy the governor knows: one call per hour per actor and tenant.
    #[must_use]
    pub const fn most_restrictive() -> Self {
        Self::new(
            RateSpec::per_secs(1, 3_600),
            RateSpec::per_secs(1, 3_600),
            Duration::from_secs(3_600),
        )
    }

    /// Validates every part of the policy.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] naming the command and the offending field.
    pub fn validate(&self, command: &str) -> Result<(), PolicyError> {
        self.actor_rate.validate(command, "actor")?;
        self.tenant_rate.validate(command, "tenant")?;
        if self.cooldown > MAX_COOLDOWN {
            return Err(PolicyError::CooldownOutOfRange {
                command: command.to_string(),
                cooldown_secs: self.cooldown.as_secs(),
            });
        }
        Ok(())
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::baseline()
    }
}

/// Command name to policy mapping with a mandatory fallback.
///
/// # Invariants
/// - `resolve` always returns a policy; there is no unlimited path.
/// - The reserved `default` key never appears in `commands`.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    /// Policy used for commands without an explicit entry.
    default: RateLimitPolicy,
    /// Explicit per-command entries.
    commands: BTreeMap<CommandName, RateLimitPolicy>,
}

impl PolicyTable {
    /// Creates a table with only a fallback policy.
    #[must_use]
    pub const fn new(default: RateLimitPolicy) -> Self {
        Self {
            default,
            commands: BTreeMap::new(),
        }
    }

    /// Builds a table from raw `(name, policy)` entries.
    ///
    /// The entry named [`CommandName::DEFAULT`] becomes the fallback. When it
    /// is absent the table falls back to [`RateLimitPolicy::most_restrictive`]
    /// rather than admitting unlimited traffic.
    #[must_use]
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (CommandName, RateLimitPolicy)>,
    {
        let mut default = None;
        let mut commands = BTreeMap::new();
        for (name, policy) in entries {
            if name.is_default() {
                default = Some(policy);
            } else {
                commands.insert(name, policy);
            }
        }
        let default = default.unwrap_or_else(|| {
            warn!(
                commands = commands.len(),
                "policy table has no default entry; using most restrictive policy"
            );
            RateLimitPolicy::most_restrictive()
        });
        Self {
            default,
            commands,
        }
    }

    /// Adds or replaces a command entry, returning the table.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<CommandName>, policy: RateLimitPolicy) -> Self {
        self.insert(command.into(), policy);
        self
    }

    /// Adds or replaces a command entry.
    ///
    /// Inserting under the reserved default name replaces the fallback.
    pub fn insert(
        &mut self,
        command: CommandName,
        policy: RateLimitPolicy,
    ) -> Option<RateLimitPolicy> {
        if command.is_default() {
            return Some(std::mem::replace(&mut self.default, policy));
        }
        self.commands.insert(command, policy)
    }

    /// Returns the policy governing `command`.
    #[must_use]
    pub fn resolve(&self, command: &CommandName) -> &RateLimitPolicy {
        self.commands.get(command).unwrap_or(&self.default)
    }

    /// Returns the explicit entry for `command`, if any.
    #[must_use]
    pub fn get(&self, command: &str) -> Option<&RateLimitPolicy> {
        self.commands.get(command)
    }

    /// Returns the fallback policy.
    #[must_use]
    pub const fn default_policy(&self) -> &RateLimitPolicy {
        &self.default
    }

    /// Iterates explicit entries in command name order.
    pub fn iter(&self) -> impl Iterator<Item = (&CommandName, &RateLimitPolicy)> {
        self.commands.iter()
    }

    /// Number of explicit entries (the fallback is not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true when only the fallback is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Validates the fallback and every explicit entry.
    ///
    /// # Errors
    ///
    /// Returns the first [`PolicyError`] encountered.
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.default.validate(CommandName::DEFAULT)?;
        for (name, policy) in &self.commands {
            policy.validate(name.as_str())?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Policy validation errors. All are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Limit is zero or above [`MAX_RATE_LIMIT`].
    #[error("policy {command}: {scope} limit {limit} out of range (1..=100000)")]
    LimitOutOfRange {
        /// Command whose policy is invalid.
        command: String,
        /// Which rate spec (`actor` or `tenant`).
        scope: &'static str,
        /// Offending limit.
        limit: u32,
    },
    /// Window is shorter than [`MIN_WINDOW`] or longer than [`MAX_WINDOW`].
    #[error("policy {command}: {scope} window {window_secs}s out of range")]
    WindowOutOfRange {
        /// Command whose policy is invalid.
        command: String,
        /// Which rate spec (`actor` or `tenant`).
        scope: &'static str,
        /// Offending window in whole seconds.
        window_secs: u64,
    },
    /// Cooldown is longer than [`MAX_COOLDOWN`].
    #[error("policy {command}: cooldown {cooldown_secs}s out of range")]
    CooldownOutOfRange {
        /// Command whose policy is invalid.
        command: String,
        /// Offending cooldown in whole seconds.
        cooldown_secs: u64,
    },
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use super::*;

    #[test]
    fn unknown_command_resolves_to_default() {
        let transfer = RateLimitPolicy::new(
            RateSpec::per_secs(2, 300),
            RateSpec::per_secs(10, 60),
            Duration::from_secs(30),
        );
        let table = PolicyTable::default().with_command("bank_transfer", transfer);
        assert_eq!(*table.resolve(&CommandName::from("bank_transfer")), transfer);
        assert_eq!(*table.resolve(&CommandName::from("unknown")), RateLimitPolicy::baseline());
    }

    #[test]
    fn entries_without_default_fall_back_to_most_restrictive() {
        let table =
            PolicyTable::from_entries([(CommandName::from("help"), RateLimitPolicy::baseline())]);
        assert_eq!(*table.default_policy(), RateLimitPolicy::most_restrictive());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn default_entry_is_not_listed_as_command() {
        let custom = RateLimitPolicy::new(
            RateSpec::per_secs(3, 60),
            RateSpec::per_secs(9, 60),
            Duration::from_secs(1),
        );
        let table = PolicyTable::from_entries([(CommandName::from("default"), custom)]);
        assert!(table.is_empty());
        assert_eq!(*table.default_policy(), custom);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let bad =
            RateLimitPolicy::new(RateSpec::per_secs(0, 60), RateSpec::per_secs(5, 60), Duration::ZERO);
        let err = PolicyTable::default().with_command("status", bad).validate().unwrap_err();
        assert!(matches!(err, PolicyError::LimitOutOfRange { scope: "actor", .. }));
    }
}
