//! Runtime configuration derived from [`shiftwatch_settings::Settings`].

use std::time::Duration;

use shiftwatch_settings::{LivenessSettings, Settings};

/// Prober cadence and escalation threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often the prober evaluates checked-in accounts.
    pub tick_interval: Duration,
    /// How long a probe may stay unanswered before it counts as a miss.
    pub probe_timeout: Duration,
    /// Consecutive misses that trigger a SUDDEN incident.
    pub max_missed_probes: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::from(&LivenessSettings::default())
    }
}

impl From<&LivenessSettings> for LivenessConfig {
    fn from(s: &LivenessSettings) -> Self {
        Self {
            tick_interval: Duration::from_secs(s.tick_interval_secs.max(1)),
            probe_timeout: Duration::from_secs(s.probe_timeout_secs.max(1)),
            max_missed_probes: s.max_missed_probes.max(1),
        }
    }
}

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    pub max_send_queue: usize,
    pub liveness: LivenessConfig,
}

impl ServerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue.max(1),
            liveness: LivenessConfig::from(&settings.liveness),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
