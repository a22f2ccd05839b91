// crates/tenant-governor-config/tests/common/mod.rs
// ============================================================================
// Module: Config Test Helpers
// Description: Shared fixtures for config validation tests.
// Purpose: Provide a small valid config to mutate in boundary tests.
// ============================================================================

//! Shared helpers for tenant-governor-config integration tests.

#![allow(dead_code, reason = "Not every test binary uses every helper.")]

use tenant_governor_config::ConfigError;
use tenant_governor_config::GovernorConfig;

/// Config with one explicit command and one database.
pub const MINIMAL_TOML: &str = r#"
[limiter.default]
actor_limit = 10
actor_window_secs = 60
tenant_limit = 50
tenant_window_secs = 60
cooldown_secs = 5

[limiter.commands.daily]
actor_limit = 1
actor_window_secs = 86400
tenant_limit = 100
tenant_window_secs = 86400

[[databases]]
path = "data/economy.db"
"#;

/// Parses [`MINIMAL_TOML`].
pub fn minimal_config() -> Result<GovernorConfig, ConfigError> {
    GovernorConfig::from_toml(MINIMAL_TOML)
}
