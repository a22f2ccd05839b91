//! Config load validation tests for tenant-governor-config.
// crates/tenant-governor-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding, syntax).
// Purpose: Ensure config input handling is strict and fail-closed.
// ============================================================================

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tenant_governor_config::ConfigError;
use tenant_governor_config::GovernorConfig;

mod common;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<GovernorConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

#[test]
fn load_reads_valid_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(common::MINIMAL_TOML.as_bytes()).map_err(|err| err.to_string())?;
    let config = GovernorConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config.databases.len() != 1 || config.limiter.commands.len() != 1 {
        return Err("unexpected config contents".to_string());
    }
    Ok(())
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    let path = Path::new(&long_path);
    assert_invalid(GovernorConfig::load(Some(path)), "config path exceeds max length")?;
    Ok(())
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    let path = Path::new(&long_component);
    assert_invalid(GovernorConfig::load(Some(path)), "config path component too long")?;
    Ok(())
}

#[test]
fn load_reports_missing_file_as_io() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("missing.toml");
    assert_invalid(GovernorConfig::load(Some(&path)), "config io error")?;
    Ok(())
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'#'; 1_048_577];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(GovernorConfig::load(Some(file.path())), "config file exceeds size limit")?;
    Ok(())
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(GovernorConfig::load(Some(file.path())), "config file must be utf-8")?;
    Ok(())
}

#[test]
fn from_toml_rejects_unknown_fields() -> TestResult {
    let toml = "[limiter]\nsweep_every = 10\n";
    assert_invalid(GovernorConfig::from_toml(toml), "config parse error")?;
    Ok(())
}

#[test]
fn from_toml_rejects_unknown_journal_mode() -> TestResult {
    let toml = "[pool]\njournal_mode = \"memory\"\n";
    assert_invalid(GovernorConfig::from_toml(toml), "config parse error")?;
    Ok(())
}

#[test]
fn empty_file_yields_defaults() -> TestResult {
    let config = GovernorConfig::from_toml("").map_err(|err| err.to_string())?;
    if !config.databases.is_empty() || config.limiter.default.is_some() {
        return Err("empty config should have no databases and no explicit default".to_string());
    }
    if config.pool.max_connections != 10 || config.limiter.sweep_interval_secs != 300 {
        return Err("unexpected pool or limiter defaults".to_string());
    }
    Ok(())
}
