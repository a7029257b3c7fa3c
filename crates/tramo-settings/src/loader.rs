//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{IdentityMode, TramoSettings};

/// Resolve the settings file path: `$TRAMO_SETTINGS` or `~/.tramo/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("TRAMO_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tramo").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TramoSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<TramoSettings> {
    let defaults = serde_json::to_value(TramoSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TramoSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
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

/// Apply `TRAMO_*` environment overrides. Unparseable values are logged and
/// ignored.
pub fn apply_env_overrides(settings: &mut TramoSettings) {
    if let Some(v) = read_env_string("TRAMO_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_parsed::<u16>("TRAMO_PORT") {
        settings.server.port = v;
    }
    if let Some(v) = read_env_parsed::<u64>("TRAMO_HEARTBEAT_INTERVAL_SECS") {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_env_parsed::<u64>("TRAMO_HEARTBEAT_TIMEOUT_SECS") {
        settings.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = read_env_parsed::<u64>("TRAMO_BROADCAST_INTERVAL_SECS") {
        settings.broker.broadcast_interval_secs = v;
    }
    if let Some(v) = read_env_parsed::<u64>("TRAMO_REAPER_INTERVAL_SECS") {
        settings.broker.reaper_interval_secs = v;
    }
    if let Some(v) = read_env_parsed::<u64>("TRAMO_GHOST_THRESHOLD_SECS") {
        settings.broker.ghost_threshold_secs = v;
    }
    if let Some(v) = read_env_parsed::<IdentityMode>("TRAMO_IDENTITY") {
        settings.broker.identity = v;
    }
    if let Some(v) = read_env_string("TRAMO_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("TRAMO_LOG_JSON").and_then(|v| parse_bool(&v)) {
        settings.logging.json = v;
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let val = read_env_string(name)?;
    let parsed = val.trim().parse().ok();
    if parsed.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    parsed
}
