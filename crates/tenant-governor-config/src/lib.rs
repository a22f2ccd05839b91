// crates/tenant-governor-config/src/lib.rs
// ============================================================================
// Module: Tenant Governor Config Library
// Description: Canonical configuration model and validation.
// Purpose: Single source of truth for tenant-governor.toml semantics.
// Dependencies: tenant-governor-core, tenant-governor-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `tenant-governor-config` loads the policy table, limiter bounds, pool
//! settings, and database list from one TOML file. Validation is strict and
//! fail-closed: any malformed value aborts startup.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
