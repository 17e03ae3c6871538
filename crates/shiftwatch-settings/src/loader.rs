//! Reads `Settings` from disk and the environment.
//!
//! The file is overlaid on the serialized defaults with [`deep_merge`]: nested
//! objects combine key by key, any other value replaces the default outright,
//! and an explicit `null` keeps the default.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::Settings;

/// `~/.shiftwatch`, falling back to `/tmp` when `HOME` is unset.
pub fn shiftwatch_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".shiftwatch")
}

pub fn settings_path() -> PathBuf {
    shiftwatch_dir().join("settings.json")
}

/// Defaults, then the file at `path` if it exists, then `SHIFTWATCH_*`
/// variables as returned by `lookup`.
///
/// Unreadable or malformed files and zero counts are errors; a missing file is not.
pub fn load_settings_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let mut layered = serde_json::to_value(Settings::default())?;

    match std::fs::read_to_string(path) {
        Ok(text) => {
            let overlay: Value = serde_json::from_str(&text)?;
            layered = deep_merge(layered, overlay);
            debug!(path = %path.display(), "settings file applied");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_owned(),
                source,
            })
        }
    }

    let mut settings: Settings = serde_json::from_value(layered)?;
    apply_overrides_from(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(merge_maps(base, overlay)),
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

fn merge_maps(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
        let merged = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        let _ = base.insert(key, merged);
    }
    base
}

/// Apply overrides using `lookup` for variable values. Bad values are logged and skipped.
pub fn apply_overrides_from(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let ranged = |name: &str, range: RangeInclusive<u64>| {
        var(name).and_then(|raw| checked(name, &raw, parse_in_range(&raw, range)))
    };

    if let Some(host) = var("SHIFTWATCH_HOST") {
        settings.server.host = host;
    }
    if let Some(port) = var("SHIFTWATCH_PORT")
        .and_then(|raw| checked("SHIFTWATCH_PORT", &raw, parse_in_range::<u16>(&raw, 1..=u16::MAX)))
    {
        settings.server.port = port;
    }
    if let Some(secs) = ranged("SHIFTWATCH_TICK_INTERVAL_SECS", 1..=3600) {
        settings.liveness.tick_interval_secs = secs;
    }
    if let Some(secs) = ranged("SHIFTWATCH_PROBE_TIMEOUT_SECS", 1..=3600) {
        settings.liveness.probe_timeout_secs = secs;
    }
    if let Some(max) = ranged("SHIFTWATCH_MAX_MISSED_PROBES", 1..=10_000) {
        settings.liveness.max_missed_probes = u32::try_from(max).unwrap_or(u32::MAX);
    }
    if let Some(path) = var("SHIFTWATCH_DB_PATH") {
        settings.storage.db_path = PathBuf::from(path);
    }
    if let Some(level) = var("SHIFTWATCH_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(json) = var("SHIFTWATCH_LOG_JSON")
        .and_then(|raw| checked("SHIFTWATCH_LOG_JSON", &raw, parse_bool(&raw)))
    {
        settings.logging.json = json;
    }
}

fn checked<T>(name: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        warn!(key = name, value = raw, "ignoring invalid environment override");
    }
    parsed
}

/// `true`/`yes`/`on`/`1` and their negatives, any case.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_in_range<T>(raw: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}
