//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section is `#[serde(default)]`
//! so partial files only need to name what they change.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerSettings,
    pub liveness: LivenessSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Reject values that would make the prober spin or never escalate.
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("liveness.tickIntervalSecs", self.liveness.tick_interval_secs),
            ("liveness.probeTimeoutSecs", self.liveness.probe_timeout_secs),
            ("liveness.maxMissedProbes", u64::from(self.liveness.max_missed_probes)),
            ("server.maxSendQueue", self.server.max_send_queue as u64),
        ];
        if let Some(&(key, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(SettingsError::NotPositive { key });
        }
        Ok(())
    }
}

/// Network settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per connection before sends start failing.
    pub max_send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_send_queue: 256,
        }
    }
}

/// Prober cadence and escalation threshold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    pub tick_interval_secs: u64,
    pub probe_timeout_secs: u64,
    /// Consecutive timed-out probes before a SUDDEN incident.
    pub max_missed_probes: u32,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        // 30 misses on a 10s tick is a five minute grace window.
        Self {
            tick_interval_secs: 10,
            probe_timeout_secs: 10,
            max_missed_probes: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: crate::loader::shiftwatch_dir().join("database").join("shiftwatch.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
