// crates/tenant-governor-cli/src/main.rs
// ============================================================================
// Module: Tenant Governor CLI Entry Point
// Description: Command dispatcher for config, policy, simulation, and pool tasks.
// Purpose: Let operators check a governor config before deploying it.
// Dependencies: clap, tenant-governor-{config,core,store-sqlite}, tokio, tracing.
// ============================================================================

//! ## Overview
//! The `tenant-governor` binary loads a governor config and exercises it
//! offline: validating the file, printing the resolved policy table,
//! replaying a burst of calls through a [`RateLimiter`] on a synthetic clock,
//! and probing every configured database through a [`PoolRegistry`].
//! Results go to stdout as JSON lines; logs go to stderr.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use std::time::Instant;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use tenant_governor_config::GovernorConfig;
use tenant_governor_core::ActorId;
use tenant_governor_core::CommandName;
use tenant_governor_core::DenyReason;
use tenant_governor_core::PolicyTable;
use tenant_governor_core::RateLimitPolicy;
use tenant_governor_core::RateLimiter;
use tenant_governor_core::TenantId;
use tenant_governor_core::UsageSnapshot;
use tenant_governor_store_sqlite::PoolRegistry;
use tenant_governor_store_sqlite::SqlitePoolConfig;
use thiserror::Error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum calls replayed by one `simulate` run.
const MAX_SIMULATED_CALLS: u32 = 10_000;
/// Maximum spacing between simulated calls (one day).
const MAX_SIMULATED_INTERVAL_MS: u64 = 24 * 60 * 60 * 1_000;
/// Log filter used when neither `--log-level` nor `RUST_LOG` is set.
const DEFAULT_LOG_FILTER: &str = "info";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "tenant-governor", version, disable_help_subcommand = true)]
struct Cli {
    /// Log filter directive written to stderr (overrides `RUST_LOG`).
    #[arg(long, value_name = "FILTER", global = true)]
    log_level: Option<String>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Policy table utilities.
    Policy {
        /// Selected policy subcommand.
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// Replay a burst of calls through the rate limiter.
    Simulate(SimulateCommand),
    /// Connection pool utilities.
    Pool {
        /// Selected pool subcommand.
        #[command(subcommand)]
        command: PoolCommand,
    },
}

/// Shared `--config` argument.
#[derive(Args, Debug, Clone, Default)]
struct ConfigArg {
    /// Config file path (defaults to tenant-governor.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a governor configuration file.
    Validate(ConfigArg),
}

/// Policy subcommands.
#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Print the resolved policy table.
    Show(PolicyShowCommand),
}

/// Arguments for `policy show`.
#[derive(Args, Debug)]
struct PolicyShowCommand {
    /// Config source.
    #[command(flatten)]
    config: ConfigArg,
    /// Print only the policy that governs this command.
    #[arg(long, value_name = "NAME")]
    command: Option<String>,
}

/// Arguments for `simulate`.
#[derive(Args, Debug)]
struct SimulateCommand {
    /// Config source.
    #[command(flatten)]
    config: ConfigArg,
    /// Tenant the calls come from.
    #[arg(long, value_name = "ID")]
    tenant: String,
    /// Actor issuing the calls.
    #[arg(long, value_name = "ID")]
    actor: String,
    /// Command being invoked.
    #[arg(long, value_name = "NAME")]
    command: String,
    /// Number of calls to replay.
    #[arg(long, default_value_t = 1)]
    calls: u32,
    /// Spacing between consecutive calls in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    interval_ms: u64,
}

/// Pool subcommands.
#[derive(Subcommand, Debug)]
enum PoolCommand {
    /// Open every configured database, run one query, and print pool stats.
    Probe(ConfigArg),
}

// ============================================================================
// SECTION: Output Types
// ============================================================================

/// One policy as printed by `policy show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PolicyView {
    /// Command name (`default` for the fallback).
    command: String,
    /// True when the command has its own entry.
    explicit: bool,
    /// Per-actor ceiling.
    actor_limit: u32,
    /// Per-actor window in seconds.
    actor_window_secs: u64,
    /// Per-tenant ceiling.
    tenant_limit: u32,
    /// Per-tenant window in seconds.
    tenant_window_secs: u64,
    /// Cooldown in seconds.
    cooldown_secs: u64,
}

impl PolicyView {
    /// Builds a view of `policy` under `command`.
    fn new(command: &str, explicit: bool, policy: &RateLimitPolicy) -> Self {
        Self {
            command: command.to_string(),
            explicit,
            actor_limit: policy.actor_rate.limit,
            actor_window_secs: policy.actor_rate.window.as_secs(),
            tenant_limit: policy.tenant_rate.limit,
            tenant_window_secs: policy.tenant_rate.window.as_secs(),
            cooldown_secs: policy.cooldown.as_secs(),
        }
    }
}

/// Inputs of one simulation run.
#[derive(Debug, Clone)]
struct SimulationRequest {
    /// Tenant the calls come from.
    tenant: TenantId,
    /// Actor issuing the calls.
    actor: ActorId,
    /// Command being invoked.
    command: CommandName,
    /// Number of calls.
    calls: u32,
    /// Spacing between calls.
    interval: Duration,
}

/// Outcome of one simulated call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct SimulatedCall {
    /// One-based call number.
    call: u32,
    /// Offset from the first call in milliseconds.
    offset_ms: u64,
    /// Whether the call was admitted.
    allowed: bool,
    /// Denial reason, absent when admitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DenyReason>,
    /// Suggested wait in milliseconds, zero when admitted.
    retry_after_ms: u64,
}

/// Closing line of a simulation run.
#[derive(Debug, Clone, Serialize)]
struct SimulationSummary {
    /// Calls admitted.
    admitted: u32,
    /// Calls denied.
    denied: u32,
    /// Live usage after the last call.
    usage: UsageSnapshot,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for operator-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Config {
            command,
        } => command_config(&command),
        Commands::Policy {
            command,
        } => command_policy(&command),
        Commands::Simulate(command) => command_simulate(&command),
        Commands::Pool {
            command,
        } => command_pool(&command).await,
    }
}

/// Installs the stderr log subscriber.
fn init_tracing(log_level: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(log_filter(log_level))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

/// Log filter from `--log-level`, else `RUST_LOG`, else [`DEFAULT_LOG_FILTER`].
fn log_filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(directive) => EnvFilter::try_new(directive).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Loads and validates the config named by `arg`.
fn load_config(arg: &ConfigArg) -> CliResult<GovernorConfig> {
    GovernorConfig::load(arg.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(arg) => {
            let config = load_config(arg)?;
            info!(
                commands = config.limiter.commands.len(),
                databases = config.databases.len(),
                "config validated"
            );
            write_stdout_line("config ok").map_err(|err| CliError::new(output_error("stdout", &err)))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Policy Commands
// ============================================================================

/// Dispatches policy subcommands.
fn command_policy(command: &PolicyCommand) -> CliResult<ExitCode> {
    match command {
        PolicyCommand::Show(command) => {
            let config = load_config(&command.config)?;
            for view in policy_views(&config.policy_table(), command.command.as_deref()) {
                write_json_line(&view)?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Flattens the table into views, or resolves a single command.
fn policy_views(table: &PolicyTable, command: Option<&str>) -> Vec<PolicyView> {
    if let Some(name) = command {
        let name = CommandName::new(name);
        let explicit = table.get(name.as_str()).is_some();
        return vec![PolicyView::new(name.as_str(), explicit, table.resolve(&name))];
    }
    std::iter::once(PolicyView::new(CommandName::DEFAULT, false, table.default_policy()))
        .chain(table.iter().map(|(name, policy)| PolicyView::new(name.as_str(), true, policy)))
        .collect()
}

// ============================================================================
// SECTION: Simulation
// ============================================================================

/// Executes `simulate`.
fn command_simulate(command: &SimulateCommand) -> CliResult<ExitCode> {
    if command.calls == 0 || command.calls > MAX_SIMULATED_CALLS {
        return Err(CliError::new(format!(
            "--calls must be between 1 and {MAX_SIMULATED_CALLS}"
        )));
    }
    if command.interval_ms > MAX_SIMULATED_INTERVAL_MS {
        return Err(CliError::new(format!(
            "--interval-ms must be at most {MAX_SIMULATED_INTERVAL_MS}"
        )));
    }
    let config = load_config(&command.config)?;
    let limiter = RateLimiter::with_limits(config.policy_table(), config.limiter_limits());
    let request = SimulationRequest {
        tenant: TenantId::new(command.tenant.as_str()),
        actor: ActorId::new(command.actor.as_str()),
        command: CommandName::new(command.command.as_str()),
        calls: command.calls,
        interval: Duration::from_millis(command.interval_ms),
    };
    let start = Instant::now();
    let outcomes = simulate_calls(&limiter, &request, start);
    for outcome in &outcomes {
        write_json_line(outcome)?;
    }
    write_json_line(&summarize(&limiter, &request, &outcomes, start))?;
    Ok(ExitCode::SUCCESS)
}

/// Replays `request.calls` calls spaced by `request.interval` starting at `start`.
fn simulate_calls(
    limiter: &RateLimiter,
    request: &SimulationRequest,
    start: Instant,
) -> Vec<SimulatedCall> {
    (0 .. request.calls)
        .map(|index| {
            let offset = request.interval.saturating_mul(index);
            let decision = limiter.admit_at(
                &request.tenant,
                &request.actor,
                &request.command,
                start + offset,
            );
            SimulatedCall {
                call: index + 1,
                offset_ms: millis(offset),
                allowed: decision.is_allowed(),
                reason: decision.reason,
                retry_after_ms: millis(decision.retry_after),
            }
        })
        .collect()
}

/// Builds the closing summary line.
fn summarize(
    limiter: &RateLimiter,
    request: &SimulationRequest,
    outcomes: &[SimulatedCall],
    start: Instant,
) -> SimulationSummary {
    let admitted = outcomes.iter().filter(|outcome| outcome.allowed).count();
    let admitted = u32::try_from(admitted).unwrap_or(u32::MAX);
    let last = request.interval.saturating_mul(request.calls.saturating_sub(1));
    SimulationSummary {
        admitted,
        denied: request.calls.saturating_sub(admitted),
        usage: limiter.usage_at(&request.tenant, &request.actor, &request.command, start + last),
    }
}

/// Whole milliseconds of `duration`, saturating.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Pool Commands
// ============================================================================

/// Dispatches pool subcommands.
async fn command_pool(command: &PoolCommand) -> CliResult<ExitCode> {
    match command {
        PoolCommand::Probe(arg) => {
            let config = load_config(arg)?;
            let databases = config.database_configs();
            if databases.is_empty() {
                warn!("no databases configured; nothing to probe");
                return Ok(ExitCode::SUCCESS);
            }
            let registry = PoolRegistry::new(config.pool_settings());
            let probed = probe_databases(&registry, databases).await;
            let stats = registry.all_stats().await;
            registry.close_all().await;
            probed?;
            for snapshot in stats.values() {
                write_json_line(snapshot)?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Opens each database through `registry` and runs one query on it.
async fn probe_databases(
    registry: &PoolRegistry,
    databases: Vec<SqlitePoolConfig>,
) -> CliResult<()> {
    info!(databases = databases.len(), "probing database pools");
    for database in databases {
        let path = database.path.display().to_string();
        let pool = registry
            .get_pool_with(database)
            .await
            .map_err(|err| CliError::new(format!("failed to open pool for {path}: {err}")))?;
        let conn = pool
            .acquire()
            .await
            .map_err(|err| CliError::new(format!("failed to acquire from {path}: {err}")))?;
        let value: i64 = conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .map_err(|err| CliError::new(format!("probe query failed for {path}: {err}")))?;
        info!(path = %path, value, "database probe ok");
    }
    Ok(())
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes one JSON value as a line on stdout.
fn write_json_line<T: Serialize>(value: &T) -> CliResult<()> {
    let line = serde_json::to_string(value)
        .map_err(|err| CliError::new(format!("failed to encode output: {err}")))?;
    write_stdout_line(&line).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
