//! Per-account work phase and liveness bookkeeping.
//!
//! ```text
//! Idle ──check-in──▶ CheckedIn ◀──break-end── OnBreak
//!                        │ └────break-start────▶ │
//!                        └──checkout──▶ CheckedOut ◀──checkout──┘
//! ```
//!
//! A check-in is accepted from every phase and re-arms detection. Every
//! change of phase clears the probe state; repeating a check-in or a checkout
//! in the phase it leads to is accepted and changes nothing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use shiftwatch_core::messages::NO_ACTIVE_STATUS;
use shiftwatch_core::StatusEvent;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WorkPhase {
    #[default]
    Idle,
    CheckedIn,
    OnBreak,
    CheckedOut,
}

impl WorkPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckedIn => "checked-in",
            Self::OnBreak => "on-break",
            Self::CheckedOut => "checked-out",
        }
    }
}

impl std::fmt::Display for WorkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status event that is not valid from the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {event} while {from}")]
pub struct TransitionError {
    pub from: WorkPhase,
    pub event: StatusEvent,
}

/// Target phase for `event` applied in `from`.
pub fn next_phase(from: WorkPhase, event: StatusEvent) -> Result<WorkPhase, TransitionError> {
    use WorkPhase::{CheckedIn, CheckedOut, OnBreak};

    let next = match (from, event) {
        (_, StatusEvent::CheckIn) => Some(CheckedIn),
        (CheckedIn, StatusEvent::BreakStart) => Some(OnBreak),
        (OnBreak, StatusEvent::BreakEnd) => Some(CheckedIn),
        (CheckedIn | OnBreak | CheckedOut, StatusEvent::Checkout) => Some(CheckedOut),
        _ => None,
    };
    next.ok_or(TransitionError { from, event })
}

/// Outstanding-probe bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeState {
    pub pending: bool,
    pub sent_at: Option<Instant>,
    /// Consecutive timed-out probes.
    pub misses: u32,
}

impl ProbeState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Mark a probe as outstanding from `now`. The miss count is kept.
    pub fn arm(&mut self, now: Instant) {
        self.pending = true;
        self.sent_at = Some(now);
    }
}

/// Result of processing a liveness acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    Accepted { round_trip: Duration },
    /// Phase is not CheckedIn; nothing to acknowledge.
    NotCheckedIn,
    /// No probe is outstanding (duplicate or unsolicited ack).
    NoPendingProbe,
    /// Sent on a channel that is not the account's current primary.
    StaleChannel,
    /// Ack timestamp precedes the probe; not authoritative.
    Implausible,
}

/// Presence record for one account.
#[derive(Clone, Debug)]
pub struct AccountPresence {
    phase: WorkPhase,
    phase_changed_at: DateTime<Utc>,
    pub probe: ProbeState,
    last_seen: Option<Instant>,
    distraction_streak: u32,
}

impl AccountPresence {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            phase: WorkPhase::Idle,
            phase_changed_at: at,
            probe: ProbeState::default(),
            last_seen: None,
            distraction_streak: 0,
        }
    }

    pub fn phase(&self) -> WorkPhase {
        self.phase
    }

    pub fn phase_changed_at(&self) -> DateTime<Utc> {
        self.phase_changed_at
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Apply a client status event. Probe state is cleared when the phase
    /// changes and untouched otherwise.
    pub fn apply(&mut self, event: StatusEvent, at: DateTime<Utc>) -> Result<WorkPhase, TransitionError> {
        let next = next_phase(self.phase, event)?;
        if next != self.phase {
            self.phase = next;
            self.phase_changed_at = at;
            self.probe.clear();
        }
        Ok(next)
    }

    /// Escalation path: leave the session without a client event.
    pub fn force_checkout(&mut self, at: DateTime<Utc>) {
        self.phase = WorkPhase::CheckedOut;
        self.phase_changed_at = at;
        self.probe.clear();
    }

    /// Process an acknowledgement received at `now`.
    ///
    /// Channel staleness is checked by the caller, which owns the registry.
    pub fn acknowledge(&mut self, now: Instant) -> AckOutcome {
        if self.phase != WorkPhase::CheckedIn {
            return AckOutcome::NotCheckedIn;
        }
        if !self.probe.pending {
            return AckOutcome::NoPendingProbe;
        }
        let Some(sent_at) = self.probe.sent_at else {
            return AckOutcome::NoPendingProbe;
        };
        let Some(round_trip) = now.checked_duration_since(sent_at) else {
            return AckOutcome::Implausible;
        };
        self.probe.clear();
        self.last_seen = Some(now);
        AckOutcome::Accepted { round_trip }
    }

    /// Track consecutive "NO ACTIVE" reports; any other status resets the streak.
    pub fn record_distraction(&mut self, status: &str) -> u32 {
        if status == NO_ACTIVE_STATUS {
            self.distraction_streak = self.distraction_streak.saturating_add(1);
        } else {
            self.distraction_streak = 0;
        }
        self.distraction_streak
    }

    /// Idle and CheckedOut records carry nothing once their channels are gone.
    pub fn is_disposable(&self) -> bool {
        matches!(self.phase, WorkPhase::Idle | WorkPhase::CheckedOut)
    }
}
