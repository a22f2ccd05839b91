// crates/tenant-governor-core/src/lib.rs
// ============================================================================
// Module: Tenant Governor Core Library
// Description: Public API surface for the Tenant Governor core.
// Purpose: Expose identifiers, rate limit policies, and the admission limiter.
// Dependencies: crate::{identifiers, policy, window, limiter}
// ============================================================================

//! ## Overview
//! Tenant Governor core decides whether a command invocation may proceed. Many
//! tenants share one process, so every call is checked against a per-actor
//! cooldown, a per-actor sliding window, and a per-tenant sliding window
//! before the handler performs any side effect.
//!
//! The limiter is an explicitly constructed value. Callers own its lifecycle
//! and pass it to command handlers; there is no process-wide instance.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod identifiers;
pub mod limiter;
pub mod policy;
pub mod window;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use identifiers::ActorId;
pub use identifiers::CommandName;
pub use identifiers::TenantId;
pub use limiter::AdmissionDecision;
pub use limiter::DenyReason;
pub use limiter::LimiterLimits;
pub use limiter::RateLimited;
pub use limiter::RateLimiter;
pub use limiter::SweepReport;
pub use limiter::TenantUsageSummary;
pub use limiter::UsageSnapshot;
pub use limiter::spawn_sweeper;
pub use policy::PolicyError;
pub use policy::PolicyTable;
pub use policy::RateLimitPolicy;
pub use policy::RateSpec;
pub use window::UsageWindow;
