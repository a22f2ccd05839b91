// crates/tenant-governor-config/src/config.rs
// ============================================================================
// Module: Tenant Governor Configuration
// Description: Configuration loading and validation for the governor.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: tenant-governor-core, tenant-governor-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Unknown fields are rejected. Every section is optional; an empty file
//! yields the built-in baseline policy, default pool settings, and no
//! databases.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tenant_governor_core::CommandName;
use tenant_governor_core::LimiterLimits;
use tenant_governor_core::PolicyTable;
use tenant_governor_core::RateLimitPolicy;
use tenant_governor_core::RateSpec;
use tenant_governor_core::limiter::DEFAULT_MAX_ACTORS_PER_TENANT;
use tenant_governor_core::limiter::DEFAULT_MAX_TENANTS;
use tenant_governor_store_sqlite::MAX_POOL_CONNECTIONS;
use tenant_governor_store_sqlite::PoolError;
use tenant_governor_store_sqlite::PoolSettings;
use tenant_governor_store_sqlite::SqliteJournalMode;
use tenant_governor_store_sqlite::SqlitePoolConfig;
use tenant_governor_store_sqlite::SqliteSyncMode;
use tenant_governor_store_sqlite::settings::DEFAULT_BUSY_TIMEOUT_MS;
use tenant_governor_store_sqlite::settings::DEFAULT_CACHE_SIZE_PAGES;
use tenant_governor_store_sqlite::settings::DEFAULT_MAX_CONNECTIONS;
use tenant_governor_store_sqlite::settings::DEFAULT_WARM_FRACTION;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "tenant-governor.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "TENANT_GOVERNOR_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum length of a command name in the policy table.
const MAX_COMMAND_NAME_LENGTH: usize = 64;
/// Maximum number of explicit command policies.
const MAX_COMMAND_POLICIES: usize = 512;
/// Maximum number of configured databases.
const MAX_DATABASES: usize = 64;
/// Upper bound for the limiter sweep interval (24 hours).
const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;
/// Upper bound for tracked tenants.
const MAX_TRACKED_TENANTS: usize = 1_048_576;
/// Upper bound for tracked actors per tenant.
const MAX_TRACKED_ACTORS: usize = 1_048_576;
/// Upper bound for any pool duration setting (24 hours, in ms).
const MAX_POOL_DURATION_MS: u64 = 24 * 60 * 60 * 1_000;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root configuration for the tenant governor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernorConfig {
    /// Rate limiter configuration.
    #[serde(default)]
    pub limiter: LimiterConfig,
    /// Pool settings shared by every database.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Databases served through the pool registry.
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

impl GovernorConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution order: explicit `path`, then [`CONFIG_ENV_VAR`], then
    /// `tenant-governor.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limiter.validate()?;
        self.pool.validate()?;
        if self.databases.len() > MAX_DATABASES {
            return Err(ConfigError::Invalid(format!(
                "too many databases: {} (max {MAX_DATABASES})",
                self.databases.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for database in &self.databases {
            database.validate()?;
            if !seen.insert(database.path.trim()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate database path: {}",
                    database.path.trim()
                )));
            }
        }
        Ok(())
    }

    /// Builds the immutable policy table.
    #[must_use]
    pub fn policy_table(&self) -> PolicyTable {
        self.limiter.policy_table()
    }

    /// Capacity bounds for the limiter.
    #[must_use]
    pub const fn limiter_limits(&self) -> LimiterLimits {
        LimiterLimits {
            max_tenants: self.limiter.max_tenants,
            max_actors_per_tenant: self.limiter.max_actors_per_tenant,
        }
    }

    /// Interval of the limiter safety-net sweep.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.limiter.sweep_interval_secs)
    }

    /// Pool settings shared by every database.
    #[must_use]
    pub fn pool_settings(&self) -> PoolSettings {
        self.pool.settings()
    }

    /// One pool configuration per configured database.
    #[must_use]
    pub fn database_configs(&self) -> Vec<SqlitePoolConfig> {
        let settings = self.pool_settings();
        self.databases
            .iter()
            .map(|database| {
                let max_connections =
                    database.max_connections.unwrap_or(settings.max_connections);
                SqlitePoolConfig::new(
                    database.path.trim(),
                    settings.clone().with_max_connections(max_connections),
                )
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Limiter Config
// ============================================================================

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterConfig {
    /// Interval of the safety-net sweep in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum tenants tracked at once.
    #[serde(default = "default_max_tenants")]
    pub max_tenants: usize,
    /// Maximum actors tracked inside one tenant.
    #[serde(default = "default_max_actors_per_tenant")]
    pub max_actors_per_tenant: usize,
    /// Fallback policy; the built-in baseline when omitted.
    #[serde(default)]
    pub default: Option<PolicyConfig>,
    /// Explicit per-command policies.
    #[serde(default)]
    pub commands: BTreeMap<String, PolicyConfig>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            max_tenants: default_max_tenants(),
            max_actors_per_tenant: default_max_actors_per_tenant(),
            default: None,
            commands: BTreeMap::new(),
        }
    }
}

impl LimiterConfig {
    /// Validates limiter settings and every policy.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 || self.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "limiter.sweep_interval_secs must be between 1 and {MAX_SWEEP_INTERVAL_SECS}"
            )));
        }
        if self.max_tenants == 0 || self.max_tenants > MAX_TRACKED_TENANTS {
            return Err(ConfigError::Invalid(format!(
                "limiter.max_tenants must be between 1 and {MAX_TRACKED_TENANTS}"
            )));
        }
        if self.max_actors_per_tenant == 0 || self.max_actors_per_tenant > MAX_TRACKED_ACTORS {
            return Err(ConfigError::Invalid(format!(
                "limiter.max_actors_per_tenant must be between 1 and {MAX_TRACKED_ACTORS}"
            )));
        }
        if self.commands.len() > MAX_COMMAND_POLICIES {
            return Err(ConfigError::Invalid(format!(
                "too many command policies: {} (max {MAX_COMMAND_POLICIES})",
                self.commands.len()
            )));
        }
        for name in self.commands.keys() {
            validate_command_name(name)?;
        }
        self.policy_table().validate().map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Builds the immutable policy table.
    fn policy_table(&self) -> PolicyTable {
        let default = self.default.as_ref().map_or_else(RateLimitPolicy::baseline, PolicyConfig::policy);
        self.commands.iter().fold(PolicyTable::new(default), |table, (name, policy)| {
            table.with_command(CommandName::new(name.as_str()), policy.policy())
        })
    }
}

/// One command's policy as written in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Per-actor ceiling.
    pub actor_limit: u32,
    /// Per-actor window in seconds.
    pub actor_window_secs: u64,
    /// Per-tenant ceiling.
    pub tenant_limit: u32,
    /// Per-tenant window in seconds.
    pub tenant_window_secs: u64,
    /// Cooldown between admitted calls in seconds.
    #[serde(default)]
    pub cooldown_secs: u64,
}

impl PolicyConfig {
    /// Converts into the core policy type.
    #[must_use]
    pub const fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            RateSpec::per_secs(self.actor_limit, self.actor_window_secs),
            RateSpec::per_secs(self.tenant_limit, self.tenant_window_secs),
            Duration::from_secs(self.cooldown_secs),
        )
    }
}

/// Returns the default limiter sweep interval.
const fn default_sweep_interval_secs() -> u64 {
    300
}

/// Returns the default tenant bound.
const fn default_max_tenants() -> usize {
    DEFAULT_MAX_TENANTS
}

/// Returns the default per-tenant actor bound.
const fn default_max_actors_per_tenant() -> usize {
    DEFAULT_MAX_ACTORS_PER_TENANT
}

// ============================================================================
// SECTION: Pool Config
// ============================================================================

/// Pool settings as written in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Default connection ceiling per database.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle age in seconds after which a connection may be evicted.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
    /// Fraction of the ceiling kept warm.
    #[serde(default = "default_warm_fraction")]
    pub warm_fraction: f64,
    /// Default acquire deadline in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Longest single wait while saturated, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Eviction pass interval in seconds.
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
    /// `SQLite` busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// `SQLite` page cache size.
    #[serde(default = "default_cache_size_pages")]
    pub cache_size_pages: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_idle_secs: default_max_idle_secs(),
            warm_fraction: default_warm_fraction(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            eviction_interval_secs: default_eviction_interval_secs(),
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            cache_size_pages: default_cache_size_pages(),
        }
    }
}

impl PoolConfig {
    /// Converts into store settings.
    fn settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            max_idle: Duration::from_secs(self.max_idle_secs),
            warm_fraction: self.warm_fraction,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            eviction_interval: Duration::from_secs(self.eviction_interval_secs),
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            cache_size_pages: self.cache_size_pages,
        }
    }

    /// Validates pool settings.
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value_ms) in [
            ("pool.max_idle_secs", self.max_idle_secs.saturating_mul(1_000)),
            ("pool.acquire_timeout_ms", self.acquire_timeout_ms),
            ("pool.retry_interval_ms", self.retry_interval_ms),
            ("pool.eviction_interval_secs", self.eviction_interval_secs.saturating_mul(1_000)),
            ("pool.busy_timeout_ms", self.busy_timeout_ms),
        ] {
            if value_ms > MAX_POOL_DURATION_MS {
                return Err(ConfigError::Invalid(format!("{name} exceeds 24 hours")));
            }
        }
        self.settings().validate().map_err(|err| match err {
            PoolError::Invalid(message) => ConfigError::Invalid(format!("pool.{message}")),
            other => ConfigError::Invalid(other.to_string()),
        })
    }
}

/// Returns the default connection ceiling.
const fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

/// Returns the default idle age in seconds.
const fn default_max_idle_secs() -> u64 {
    300
}

/// Returns the default warm fraction.
const fn default_warm_fraction() -> f64 {
    DEFAULT_WARM_FRACTION
}

/// Returns the default acquire deadline in milliseconds.
const fn default_acquire_timeout_ms() -> u64 {
    30_000
}

/// Returns the default saturated wait in milliseconds.
const fn default_retry_interval_ms() -> u64 {
    2_000
}

/// Returns the default eviction interval in seconds.
const fn default_eviction_interval_secs() -> u64 {
    60
}

/// Returns the default busy timeout in milliseconds.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default page cache size.
const fn default_cache_size_pages() -> i64 {
    DEFAULT_CACHE_SIZE_PAGES
}

// ============================================================================
// SECTION: Database Config
// ============================================================================

/// One database served through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: String,
    /// Connection ceiling override for this database.
    #[serde(default)]
    pub max_connections: Option<usize>,
}

impl DatabaseConfig {
    /// Validates the path and ceiling override.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("databases.path", &self.path)?;
        if let Some(max) = self.max_connections
            && (max == 0 || max > MAX_POOL_CONNECTIONS)
        {
            return Err(ConfigError::Invalid(format!(
                "databases.max_connections must be between 1 and {MAX_POOL_CONNECTIONS}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a command key of `[limiter.commands]`.
fn validate_command_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() || name.trim() != name {
        return Err(ConfigError::Invalid(format!(
            "limiter.commands key {name:?} must be non-empty without surrounding whitespace"
        )));
    }
    if name.len() > MAX_COMMAND_NAME_LENGTH {
        return Err(ConfigError::Invalid(format!(
            "limiter.commands key exceeds {MAX_COMMAND_NAME_LENGTH} bytes"
        )));
    }
    if name == CommandName::DEFAULT {
        return Err(ConfigError::Invalid(
            "limiter.commands.default is reserved; use [limiter.default]".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
