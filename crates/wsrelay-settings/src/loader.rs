//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `WSRELAY_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Paths the server routes itself; the WebSocket endpoint may not shadow them.
const RESERVED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Resolve the default settings file (`~/.wsrelay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wsrelay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings reading overrides through `env` instead of the process
/// environment.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides_from(&mut settings, env);
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

/// Apply `WSRELAY_*` overrides looked up through `env`.
///
/// Values that fail to parse or fall out of range are logged and ignored.
pub fn apply_overrides_from(settings: &mut RelaySettings, env: impl Fn(&str) -> Option<String>) {
    let env = EnvReader(env);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WSRELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("WSRELAY_PORT", 1, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("WSRELAY_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = env.string("WSRELAY_STATIC_DIR") {
        settings.server.static_dir = Some(PathBuf::from(v));
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("WSRELAY_KEEPALIVE_SECS", 0, 3_600) {
        settings.relay.keep_alive_interval_secs = v;
    }
    if let Some(v) = env.u64_in("WSRELAY_SEND_QUEUE", 1, 65_536) {
        settings.relay.send_queue_capacity = v as usize;
    }
    if let Some(v) = env.u64_in("WSRELAY_SEND_TIMEOUT_MS", 1, 600_000) {
        settings.relay.send_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WSRELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("WSRELAY_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.string("WSRELAY_LOG_FILE") {
        settings.logging.file = Some(PathBuf::from(v));
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    let path = &settings.server.path;
    if !path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "server.path must start with '/', got {path:?}"
        )));
    }
    if RESERVED_PATHS.contains(&path.as_str()) {
        return Err(SettingsError::InvalidValue(format!(
            "server.path {path:?} is reserved"
        )));
    }
    if settings.logging.modules.keys().any(|target| target.trim().is_empty()) {
        return Err(SettingsError::InvalidValue(
            "logging.modules keys must name a target".to_string(),
        ));
    }
    if settings.relay.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "relay.sendQueueCapacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid numeric env var, ignoring");
        }
        result
    }
}
