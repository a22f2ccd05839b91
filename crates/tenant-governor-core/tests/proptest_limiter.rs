// crates/tenant-governor-core/tests/proptest_limiter.rs
// ============================================================================
// Module: Rate Limiter Property-Based Tests
// Description: Property tests for sliding-window ceilings and cooldowns.
// Purpose: Check admission invariants across arbitrary call schedules.
// ============================================================================

//! Property-based tests for rate limiter invariants.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::time::Duration;
use std::time::Instant;

use proptest::prelude::*;
use tenant_governor_core::ActorId;
use tenant_governor_core::CommandName;
use tenant_governor_core::DenyReason;
use tenant_governor_core::PolicyTable;
use tenant_governor_core::RateLimitPolicy;
use tenant_governor_core::RateLimiter;
use tenant_governor_core::RateSpec;
use tenant_governor_core::TenantId;

fn limiter(limit: u32, window_secs: u64, cooldown_ms: u64) -> RateLimiter {
    let policy = RateLimitPolicy::new(
        RateSpec::per_secs(limit, window_secs),
        RateSpec::per_secs(100_000, window_secs),
        Duration::from_millis(cooldown_ms),
    );
    RateLimiter::new(PolicyTable::new(policy))
}

proptest! {
    #[test]
    fn admissions_never_exceed_window_ceiling(
        limit in 1_u32 .. 8,
        window_secs in 1_u64 .. 30,
        gaps in prop::collection::vec(0_u64 .. 5_000, 1 .. 120),
    ) {
        let limiter = limiter(limit, window_secs, 0);
        let tenant = TenantId::from("guild");
        let actor = ActorId::from("actor");
        let command = CommandName::from("cmd");
        let window = Duration::from_secs(window_secs);
        let start = Instant::now();

        let mut now = start;
        let mut admitted: Vec<Instant> = Vec::new();
        for gap in gaps {
            now += Duration::from_millis(gap);
            let live = admitted.iter().filter(|stamp| now.duration_since(**stamp) < window).count();
            let decision = limiter.admit_at(&tenant, &actor, &command, now);
            let limit_len = usize::try_from(limit).unwrap();
            if live < limit_len {
                prop_assert!(decision.allowed);
                admitted.push(now);
            } else {
                prop_assert_eq!(decision.reason, Some(DenyReason::ActorLimit));
                prop_assert!(decision.retry_after > Duration::ZERO);
                prop_assert!(decision.retry_after <= window);
            }
        }
    }

    #[test]
    fn calls_inside_cooldown_are_rejected(
        cooldown_ms in 1_u64 .. 10_000,
        offset_ms in 0_u64 .. 10_000,
    ) {
        let limiter = limiter(1_000, 60, cooldown_ms);
        let tenant = TenantId::from("guild");
        let actor = ActorId::from("actor");
        let command = CommandName::from("cmd");
        let start = Instant::now();

        prop_assert!(limiter.admit_at(&tenant, &actor, &command, start).allowed);
        let decision =
            limiter.admit_at(&tenant, &actor, &command, start + Duration::from_millis(offset_ms));
        if offset_ms < cooldown_ms {
            prop_assert_eq!(decision.reason, Some(DenyReason::Cooldown));
            prop_assert_eq!(decision.retry_after, Duration::from_millis(cooldown_ms - offset_ms));
        } else {
            prop_assert!(decision.allowed);
        }
    }
}
