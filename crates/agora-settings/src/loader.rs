//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AgoraSettings::default()`]
//! 2. If `~/.agora/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `AGORA_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::AgoraSettings;

/// Root directory for Agora state (`~/.agora`).
pub fn agora_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".agora")
}

/// Resolve the path to the settings file (`~/.agora/settings.json`).
pub fn settings_path() -> PathBuf {
    agora_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AgoraSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<AgoraSettings> {
    let defaults = serde_json::to_value(AgoraSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: AgoraSettings = serde_json::from_value(merged)?;
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides(settings: &mut AgoraSettings) {
    // ── Sync ────────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("AGORA_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.sync.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("AGORA_RECONNECT_DELAY_MS", 0, 600_000) {
        settings.sync.reconnect_delay_ms = v;
    }
    if let Some(v) = read_env_u64("AGORA_MAX_RECONNECT_ATTEMPTS", 0, 1_000) {
        settings.sync.max_reconnect_attempts = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = read_env_u64("AGORA_TYPING_WINDOW_MS", 100, 60_000) {
        settings.sync.typing_window_ms = v;
    }
    if let Some(v) = read_env_f64("AGORA_CONFIDENCE_THRESHOLD", 0.0, 1.0) {
        settings.sync.confidence_threshold = v;
    }
    if let Some(v) = read_env_u64("AGORA_VERIFICATION_TIMEOUT_MS", 100, 600_000) {
        settings.sync.verification_timeout_ms = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("AGORA_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("AGORA_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_u64("AGORA_REPLY_DELAY_MS", 0, 60_000) {
        settings.server.reply_delay_ms = v;
    }

    // ── Providers ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("AGORA_REPLY_ENDPOINT") {
        settings.providers.reply_endpoint = Some(v);
    }
    if let Some(v) = read_env_string("AGORA_REPLY_MODEL") {
        settings.providers.reply_model = v;
    }
    if let Some(v) = read_env_string("AGORA_VERIFY_ENDPOINT") {
        settings.providers.verify_endpoint = Some(v);
    }

    // ── Store / logging ─────────────────────────────────────────────
    if let Some(v) = read_env_string("AGORA_DB_PATH") {
        settings.store.db_path = Some(v);
    }
    if let Some(v) = read_env_string("AGORA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("AGORA_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = parse_f64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
