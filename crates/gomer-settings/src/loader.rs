//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GomerSettings::default()`]
//! 2. If `~/.gomer/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GomerSettings;

/// Resolve the path to the settings file (`~/.gomer/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gomer").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GomerSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GomerSettings> {
    let defaults = serde_json::to_value(GomerSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GomerSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &GomerSettings) -> Result<()> {
    if settings.sandbox.run_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "sandbox.runTimeoutMs must be positive".into(),
        ));
    }
    if settings.sandbox.resolve_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "sandbox.resolveTimeoutMs must be positive".into(),
        ));
    }
    if settings.sandbox.module_name.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "sandbox.moduleName must not be empty".into(),
        ));
    }
    if settings.server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendQueueCapacity must be positive".into(),
        ));
    }
    Ok(())
}

/// Apply `GOMER_*` environment variable overrides.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut GomerSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("GOMER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("GOMER_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("GOMER_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_string("GOMER_STATIC_DIR") {
        settings.server.static_dir = Some(v);
    }

    // ── Sandbox ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("GOMER_GO_BINARY") {
        settings.sandbox.go_binary = v;
    }
    if let Some(v) = read_env_string("GOMER_GOFMT_BINARY") {
        settings.sandbox.gofmt_binary = v;
    }
    if let Some(v) = read_env_u64("GOMER_RUN_TIMEOUT_MS", 100, 600_000) {
        settings.sandbox.run_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("GOMER_RESOLVE_TIMEOUT_MS", 100, 3_600_000) {
        settings.sandbox.resolve_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("GOMER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
