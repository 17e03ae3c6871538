//! Liveness prober: a single interval task that probes every checked-in account.
//!
//! Policy for an unanswered probe: once it times out it counts as a miss and a
//! fresh probe is issued immediately (with a new `sent_at`), so each miss
//! corresponds to one full timeout window with no acknowledgement.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LivenessConfig;
use crate::monitor::PresenceMonitor;
use crate::presence::ProbeState;

/// What a tick decided for one account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeAction {
    /// A probe is outstanding and still within its timeout.
    Waiting,
    /// No probe was outstanding; a new one is due.
    Probe,
    /// The outstanding probe timed out below the threshold; re-probe.
    Missed { misses: u32 },
    /// The miss threshold was reached.
    Escalate,
}

impl ProbeAction {
    pub fn sends_probe(self) -> bool {
        matches!(self, Self::Probe | Self::Missed { .. })
    }
}

/// Evaluate one account whose phase is CheckedIn and whose primary is open.
///
/// Mutates `probe` as if the probe send succeeds; a failed send is not a miss.
pub fn evaluate(probe: &mut ProbeState, now: Instant, config: &LivenessConfig) -> ProbeAction {
    if !probe.pending {
        probe.arm(now);
        return ProbeAction::Probe;
    }

    let elapsed = probe
        .sent_at
        .map_or(config.probe_timeout, |sent| now.saturating_duration_since(sent));
    if elapsed < config.probe_timeout {
        return ProbeAction::Waiting;
    }

    probe.misses = probe.misses.saturating_add(1);
    if probe.misses >= config.max_missed_probes {
        return ProbeAction::Escalate;
    }
    probe.arm(now);
    ProbeAction::Missed { misses: probe.misses }
}

/// Counters from one prober tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub probes_sent: usize,
    pub send_failures: usize,
    pub misses: usize,
    pub escalated: Vec<shiftwatch_core::AccountId>,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.probes_sent == 0 && self.send_failures == 0 && self.misses == 0 && self.escalated.is_empty()
    }
}

/// Spawn the prober loop. It stops when `cancel` fires.
pub fn spawn_prober(monitor: Arc<PresenceMonitor>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = monitor.config().tick_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // consume first immediate tick

        info!(interval_ms = period.as_millis() as u64, "liveness prober started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = monitor.tick(Instant::now());
                    if !report.is_quiet() {
                        debug!(
                            evaluated = report.evaluated,
                            probes_sent = report.probes_sent,
                            send_failures = report.send_failures,
                            misses = report.misses,
                            escalated = report.escalated.len(),
                            "prober tick"
                        );
                    }
                }
                () = cancel.cancelled() => {
                    info!("liveness prober stopped");
                    break;
                }
            }
        }
    })
}
