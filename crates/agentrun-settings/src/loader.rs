//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AgentRunSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `AGENTRUN_*` environment variable overrides
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{AgentRunSettings, LogFormat};

/// Root directory for agentrun state (`~/.agentrun`).
pub fn agentrun_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".agentrun")
}

/// Default settings file path (`~/.agentrun/settings.json`).
pub fn settings_path() -> PathBuf {
    agentrun_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AgentRunSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with process env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<AgentRunSettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, resolving overrides through `lookup`.
pub fn load_settings_with_env<F>(path: &Path, lookup: F) -> Result<AgentRunSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(AgentRunSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: AgentRunSettings = serde_json::from_value(merged)?;
    apply_env_overrides_from(&mut settings, lookup);
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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut AgentRunSettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides resolved through `lookup`.
///
/// Invalid values are logged and ignored, leaving the file/default value.
pub fn apply_env_overrides_from<F>(settings: &mut AgentRunSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Identity and logging ────────────────────────────────────────
    if let Some(v) = env.string("AGENTRUN_INSTANCE_ID") {
        settings.instance.instance_id = Some(v);
    }
    if let Some(v) = env.string("AGENTRUN_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("AGENTRUN_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "AGENTRUN_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }

    // ── Coordinator ─────────────────────────────────────────────────
    let c = &mut settings.coordinator;
    if let Some(v) = env.u64("AGENTRUN_LIVENESS_TTL_SECS", 60, 604_800) {
        c.liveness_ttl_secs = v;
    }
    if let Some(v) = env.u64("AGENTRUN_RENEW_EVERY_EVENTS", 1, 100_000) {
        c.renew_every_events = v;
    }
    if let Some(v) = env.u64("AGENTRUN_RENEW_INTERVAL_SECS", 1, 86_400) {
        c.renew_interval_secs = v;
    }
    if let Some(v) = env.u64("AGENTRUN_CONTROL_POLL_TIMEOUT_MS", 10, 5_000) {
        c.control_poll_timeout_ms = v;
    }
    if let Some(v) = env.u64("AGENTRUN_RESPONSE_LOG_TTL_SECS", 60, 2_592_000) {
        c.response_log_ttl_secs = v;
    }
    if let Some(v) = env.u64("AGENTRUN_DRAIN_TIMEOUT_SECS", 1, 600) {
        c.drain_timeout_secs = v;
    }

    // ── Finalize retry ──────────────────────────────────────────────
    if let Some(v) = env.u64("AGENTRUN_FINALIZE_MAX_ATTEMPTS", 1, 10) {
        settings.finalize_retry.max_attempts = v as u32;
    }

    // ── Reconciler ──────────────────────────────────────────────────
    if let Some(v) = env.bool("AGENTRUN_RECONCILER_ENABLED") {
        settings.reconciler.enabled = v;
    }
    if let Some(v) = env.u64("AGENTRUN_RECONCILER_INTERVAL_SECS", 1, 86_400) {
        settings.reconciler.interval_secs = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("AGENTRUN_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = env.usize("AGENTRUN_POOL_SIZE", 1, 64) {
        settings.store.pool_size = v as u32;
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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "compact" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

// ── Env readers (thin wrappers over the lookup) ─────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = json!({"coordinator": {"renewEveryEvents": 50, "livenessTtlSecs": 86400}});
        let source = json!({"coordinator": {"renewEveryEvents": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["coordinator"]["renewEveryEvents"], 10);
        assert_eq!(merged["coordinator"]["livenessTtlSecs"], 86400);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1, "b": 2}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(json!({"items": [1, 2, 3]}), json!({"items": [4]}));
        assert_eq!(merged["items"], json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"nested": true}}), json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings =
            load_settings_with_env(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings.coordinator.renew_every_events, 50);
        assert_eq!(settings.store.pool_size, 8);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"coordinator": {"renewEveryEvents": 5}, "finalizeRetry": {"maxAttempts": 4}, "logging": {"format": "json"}}"#,
        )
        .unwrap();

        let settings = load_settings_with_env(&path, no_env).unwrap();
        assert_eq!(settings.coordinator.renew_every_events, 5);
        assert_eq!(settings.coordinator.liveness_ttl_secs, 86_400);
        assert_eq!(settings.finalize_retry.max_attempts, 4);
        assert_eq!(settings.finalize_retry.base_delay_ms, 500);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(
            load_settings_with_env(&path, no_env),
            Err(SettingsError::Json(_))
        );
    }

    #[test]
    fn invalid_combination_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"store": {"poolSize": 0}}"#).unwrap();
        assert_matches!(
            load_settings_with_env(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"instance": {"instanceId": "from-file"}}"#).unwrap();

        let settings = load_settings_with_env(
            &path,
            env(&[
                ("AGENTRUN_INSTANCE_ID", "from-env"),
                ("AGENTRUN_RENEW_EVERY_EVENTS", "7"),
                ("AGENTRUN_RECONCILER_ENABLED", "off"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.instance.instance_id.as_deref(), Some("from-env"));
        assert_eq!(settings.coordinator.renew_every_events, 7);
        assert!(!settings.reconciler.enabled);
    }

    #[test]
    fn out_of_range_env_ignored() {
        let mut settings = AgentRunSettings::default();
        apply_env_overrides_from(
            &mut settings,
            env(&[
                ("AGENTRUN_CONTROL_POLL_TIMEOUT_MS", "1"),
                ("AGENTRUN_POOL_SIZE", "abc"),
                ("AGENTRUN_LOG_FORMAT", "xml"),
            ]),
        );
        assert_eq!(settings.coordinator.control_poll_timeout_ms, 500);
        assert_eq!(settings.store.pool_size, 8);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn empty_string_env_ignored() {
        let mut settings = AgentRunSettings::default();
        apply_env_overrides_from(&mut settings, env(&[("AGENTRUN_DB_PATH", "")]));
        assert_eq!(settings.store.db_path, "database/runs.db");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_bounds_inclusive() {
        assert_eq!(parse_u64_range("10", 10, 20), Some(10));
        assert_eq!(parse_u64_range("20", 10, 20), Some(20));
        assert_eq!(parse_u64_range("21", 10, 20), None);
        assert_eq!(parse_u64_range("-1", 0, 20), None);
    }

    #[test]
    fn parse_log_format_names() {
        assert_eq!(parse_log_format("JSON"), Some(LogFormat::Json));
        assert_eq!(parse_log_format("compact"), Some(LogFormat::Compact));
        assert_eq!(parse_log_format("yaml"), None);
    }
}
