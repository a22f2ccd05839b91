//! Limiter, pool, and database validation tests for tenant-governor-config.
// crates/tenant-governor-config/tests/policy_validation.rs
// ============================================================================
// Module: Policy Validation Tests
// Description: Boundaries of limiter policies, pool settings, and databases.
// Purpose: Ensure invalid thresholds fail at startup instead of at runtime.
// ============================================================================

use std::time::Duration;

use tenant_governor_config::ConfigError;
use tenant_governor_config::DatabaseConfig;
use tenant_governor_config::GovernorConfig;
use tenant_governor_config::PolicyConfig;
use tenant_governor_core::CommandName;
use tenant_governor_core::RateLimitPolicy;
use tenant_governor_store_sqlite::SqliteJournalMode;

mod common;

type TestResult = Result<(), String>;

/// Assert that a validation result is an error containing a specific substring.
fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error '{message}' did not contain '{needle}'"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

const fn policy(actor_limit: u32, tenant_limit: u32) -> PolicyConfig {
    PolicyConfig {
        actor_limit,
        actor_window_secs: 60,
        tenant_limit,
        tenant_window_secs: 60,
        cooldown_secs: 0,
    }
}

// ============================================================================
// SECTION: Policy Table
// ============================================================================

#[test]
fn policy_table_uses_configured_entries() -> TestResult {
    let config = common::minimal_config().map_err(|err| err.to_string())?;
    let table = config.policy_table();
    let daily = table.resolve(&CommandName::new("daily"));
    if daily.actor_rate.limit != 1 || daily.actor_rate.window != Duration::from_secs(86_400) {
        return Err("unexpected daily policy".to_string());
    }
    if daily.cooldown != Duration::ZERO {
        return Err("cooldown should default to zero".to_string());
    }
    let fallback = table.resolve(&CommandName::new("unknown"));
    if fallback.cooldown != Duration::from_secs(5) {
        return Err("unexpected fallback policy".to_string());
    }
    Ok(())
}

#[test]
fn missing_default_uses_baseline() -> TestResult {
    let config = GovernorConfig::from_toml("").map_err(|err| err.to_string())?;
    if *config.policy_table().default_policy() != RateLimitPolicy::baseline() {
        return Err("missing default should resolve to the baseline policy".to_string());
    }
    Ok(())
}

#[test]
fn reserved_default_command_key_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.limiter.commands.insert("default".to_string(), policy(1, 1));
    assert_invalid(config.validate(), "limiter.commands.default is reserved")?;
    Ok(())
}

#[test]
fn zero_actor_limit_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.limiter.commands.insert("work".to_string(), policy(0, 10));
    assert_invalid(config.validate(), "policy work: actor limit 0 out of range")?;
    Ok(())
}

#[test]
fn zero_window_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    let mut bad = policy(5, 10);
    bad.tenant_window_secs = 0;
    config.limiter.default = Some(bad);
    assert_invalid(config.validate(), "policy default: tenant window 0s out of range")?;
    Ok(())
}

#[test]
fn limit_at_maximum_accepted() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.limiter.commands.insert("work".to_string(), policy(100_000, 100_000));
    config.validate().map_err(|err| err.to_string())?;
    Ok(())
}

#[test]
fn padded_command_key_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.limiter.commands.insert(" work".to_string(), policy(1, 1));
    assert_invalid(config.validate(), "without surrounding whitespace")?;
    Ok(())
}

#[test]
fn zero_sweep_interval_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.limiter.sweep_interval_secs = 0;
    assert_invalid(config.validate(), "limiter.sweep_interval_secs must be between")?;
    Ok(())
}

#[test]
fn zero_max_tenants_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.limiter.max_tenants = 0;
    assert_invalid(config.validate(), "limiter.max_tenants must be between")?;
    Ok(())
}

#[test]
fn limiter_limits_follow_config() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.limiter.max_tenants = 7;
    config.limiter.max_actors_per_tenant = 3;
    config.limiter.sweep_interval_secs = 30;
    let limits = config.limiter_limits();
    if limits.max_tenants != 7 || limits.max_actors_per_tenant != 3 {
        return Err("unexpected limiter limits".to_string());
    }
    if config.sweep_interval() != Duration::from_secs(30) {
        return Err("sweep interval not converted".to_string());
    }
    Ok(())
}

// ============================================================================
// SECTION: Pool Settings
// ============================================================================

#[test]
fn pool_ceiling_above_maximum_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.pool.max_connections = 65;
    assert_invalid(config.validate(), "pool.max_connections out of range")?;
    Ok(())
}

#[test]
fn warm_fraction_above_one_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.pool.warm_fraction = 1.5;
    assert_invalid(config.validate(), "pool.warm_fraction must be between 0 and 1")?;
    Ok(())
}

#[test]
fn zero_acquire_timeout_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.pool.acquire_timeout_ms = 0;
    assert_invalid(config.validate(), "pool.acquire_timeout must be greater than zero")?;
    Ok(())
}

#[test]
fn excessive_busy_timeout_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.pool.busy_timeout_ms = 25 * 60 * 60 * 1_000;
    assert_invalid(config.validate(), "pool.busy_timeout_ms exceeds 24 hours")?;
    Ok(())
}

#[test]
fn pool_settings_follow_config() -> TestResult {
    let toml = r#"
[pool]
max_connections = 4
max_idle_secs = 30
acquire_timeout_ms = 750
journal_mode = "delete"
"#;
    let config = GovernorConfig::from_toml(toml).map_err(|err| err.to_string())?;
    let settings = config.pool_settings();
    if settings.max_connections != 4
        || settings.max_idle != Duration::from_secs(30)
        || settings.acquire_timeout != Duration::from_millis(750)
        || settings.journal_mode != SqliteJournalMode::Delete
    {
        return Err("unexpected pool settings".to_string());
    }
    if settings.warm_floor() != 1 {
        return Err(format!("unexpected warm floor: {}", settings.warm_floor()));
    }
    Ok(())
}

// ============================================================================
// SECTION: Databases
// ============================================================================

#[test]
fn database_override_applies_to_one_pool() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.databases.push(DatabaseConfig {
        path: "data/transport.db".to_string(),
        max_connections: Some(2),
    });
    config.validate().map_err(|err| err.to_string())?;
    let pools = config.database_configs();
    let ceilings: Vec<usize> = pools.iter().map(|pool| pool.settings.max_connections).collect();
    if ceilings != vec![10, 2] {
        return Err(format!("unexpected ceilings: {}", ceilings.len()));
    }
    Ok(())
}

#[test]
fn duplicate_database_path_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.databases.push(DatabaseConfig {
        path: "data/economy.db".to_string(),
        max_connections: None,
    });
    assert_invalid(config.validate(), "duplicate database path: data/economy.db")?;
    Ok(())
}

#[test]
fn empty_database_path_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.databases.push(DatabaseConfig {
        path: "  ".to_string(),
        max_connections: None,
    });
    assert_invalid(config.validate(), "databases.path must be non-empty")?;
    Ok(())
}

#[test]
fn zero_database_ceiling_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.databases[0].max_connections = Some(0);
    assert_invalid(config.validate(), "databases.max_connections must be between 1 and 64")?;
    Ok(())
}
