//! Shared presence state for every account.
//!
//! Registry entries, work phase and probe state live in one [`MonitorState`]
//! behind a single mutex, so a status change and a prober tick can never
//! interleave on the same account. Nothing awaits while the lock is held;
//! incident persistence happens after it is released.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shiftwatch_core::{AccountId, IncidentReason, IncidentRecord, OutboundMessage, StatusEvent};
use shiftwatch_store::IncidentSink;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LivenessConfig;
use crate::connection::{ChannelRole, ClientConnection, CloseCause};
use crate::errors::BindError;
use crate::notifier::IncidentNotifier;
use crate::presence::{AccountPresence, AckOutcome, TransitionError, WorkPhase};
use crate::prober::{evaluate, ProbeAction, TickReport};
use crate::registry::ConnectionRegistry;

#[derive(Default)]
struct MonitorState {
    registry: ConnectionRegistry,
    presence: HashMap<AccountId, AccountPresence>,
}

/// Point-in-time view of one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub phase: WorkPhase,
    pub pending: bool,
    pub misses: u32,
    pub phase_changed_at: DateTime<Utc>,
    pub last_seen: Option<Instant>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub accounts: usize,
    pub checked_in: usize,
    pub channels: usize,
}

pub struct PresenceMonitor {
    state: Mutex<MonitorState>,
    config: LivenessConfig,
    notifier: IncidentNotifier,
}

impl PresenceMonitor {
    pub fn new(config: LivenessConfig, sink: Arc<dyn IncidentSink>) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            config,
            notifier: IncidentNotifier::new(sink),
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Bind `conn` to `account` and register it under its role.
    ///
    /// A connection is bound once; naming the same account again is a no-op,
    /// so a superseded channel cannot take its slot back. A primary that is
    /// still the live channel of a CheckedIn or OnBreak account cannot be
    /// moved to another account. Returns `Ok(true)` when a new binding was made.
    pub fn bind(&self, account: &AccountId, conn: &Arc<ClientConnection>) -> Result<bool, BindError> {
        let previous = conn.account();
        if previous.as_ref() == Some(account) {
            return Ok(false);
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(old) = previous {
            let active = state
                .presence
                .get(&old)
                .is_some_and(|p| matches!(p.phase(), WorkPhase::CheckedIn | WorkPhase::OnBreak));
            if active && conn.role == ChannelRole::Primary && state.registry.is_current(&old, conn.role, &conn.id) {
                warn!(conn_id = %conn.id, bound = %old, requested = %account, "rebind refused");
                return Err(BindError { bound: old });
            }
            let _ = state.registry.release(&old, conn.role, &conn.id);
            prune(state, &old);
            debug!(conn_id = %conn.id, from = %old, to = %account, "connection rebound");
        }

        conn.bind_account(account.clone());
        if let Some(superseded) = state.registry.register(account.clone(), conn.role, Arc::clone(conn)) {
            if superseded.id != conn.id {
                info!(
                    account_id = %account,
                    role = %conn.role,
                    old_conn = %superseded.id,
                    new_conn = %conn.id,
                    "channel superseded"
                );
            }
        }
        let _ = state
            .presence
            .entry(account.clone())
            .or_insert_with(|| AccountPresence::new(Utc::now()));

        info!(account_id = %account, conn_id = %conn.id, role = %conn.role, "channel registered");
        Ok(true)
    }

    /// Apply a client status event.
    pub fn apply_status(&self, account: &AccountId, event: StatusEvent) -> Result<WorkPhase, TransitionError> {
        let mut state = self.state.lock();
        let presence = state
            .presence
            .entry(account.clone())
            .or_insert_with(|| AccountPresence::new(Utc::now()));
        let from = presence.phase();
        match presence.apply(event, Utc::now()) {
            Ok(to) => {
                info!(account_id = %account, %event, %from, %to, "status changed");
                Ok(to)
            }
            Err(e) => {
                debug!(account_id = %account, error = %e, "status event rejected");
                Err(e)
            }
        }
    }

    /// Process a liveness acknowledgement arriving on `conn` at `now`.
    pub fn acknowledge(&self, account: &AccountId, conn: &ClientConnection, now: Instant) -> AckOutcome {
        let mut state = self.state.lock();
        let outcome = if !state.registry.is_current(account, ChannelRole::Primary, &conn.id) {
            AckOutcome::StaleChannel
        } else {
            match state.presence.get_mut(account) {
                Some(presence) => presence.acknowledge(now),
                None => AckOutcome::NotCheckedIn,
            }
        };
        drop(state);

        match outcome {
            AckOutcome::Accepted { round_trip } => {
                debug!(account_id = %account, round_trip_ms = round_trip.as_millis() as u64, "liveness ack");
            }
            other => debug!(account_id = %account, conn_id = %conn.id, outcome = ?other, "liveness ack ignored"),
        }
        outcome
    }

    /// One prober pass over every checked-in account with an open primary.
    pub fn tick(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let mut incidents = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            for (account, presence) in state.presence.iter_mut() {
                if presence.phase() != WorkPhase::CheckedIn {
                    continue;
                }
                let Some(primary) = state.registry.open_primary(account) else {
                    continue;
                };
                report.evaluated += 1;

                let action = evaluate(&mut presence.probe, now, &self.config);
                match action {
                    ProbeAction::Escalate => {
                        report.misses += 1;
                        report.escalated.push(account.clone());
                    }
                    ProbeAction::Missed { misses } => {
                        report.misses += 1;
                        debug!(account_id = %account, misses, "probe timed out");
                    }
                    ProbeAction::Waiting | ProbeAction::Probe => {}
                }
                if action.sends_probe() {
                    match primary.send_message(&OutboundMessage::LivenessProbe) {
                        Ok(()) => report.probes_sent += 1,
                        Err(e) => {
                            report.send_failures += 1;
                            debug!(account_id = %account, conn_id = %primary.id, error = %e, "probe send failed");
                        }
                    }
                }
            }

            for account in &report.escalated {
                let channels = state.registry.channels(account);
                if let Some(presence) = state.presence.get_mut(account) {
                    incidents.push(self.notifier.disarm(
                        account,
                        presence,
                        &channels,
                        IncidentReason::NoHeartbeat,
                    ));
                }
            }
        }

        for record in &incidents {
            let _ = self.notifier.persist(record);
        }
        report
    }

    /// Called once a channel's socket task has ended.
    ///
    /// An ungraceful close of the account's current primary while CheckedIn
    /// escalates immediately. Returns the incident, if one was raised.
    pub fn channel_closed(&self, conn: &ClientConnection, cause: CloseCause) -> Option<IncidentRecord> {
        let account = conn.account()?;
        let record = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let was_current = state.registry.release(&account, conn.role, &conn.id);
            let mut record = None;
            if was_current && conn.role == ChannelRole::Primary && cause == CloseCause::Dropped {
                if let Some(presence) = state.presence.get_mut(&account) {
                    if presence.phase() == WorkPhase::CheckedIn {
                        let channels = state.registry.channels(&account);
                        record = Some(self.notifier.disarm(
                            &account,
                            presence,
                            &channels,
                            IncidentReason::ClientDisconnected,
                        ));
                    }
                }
            }
            prune(state, &account);
            record
        };

        debug!(account_id = %account, conn_id = %conn.id, role = %conn.role, ?cause, "channel closed");
        if let Some(record) = &record {
            let _ = self.notifier.persist(record);
        }
        record
    }

    /// Update the "NO ACTIVE" streak for the account and return it.
    pub fn record_distraction(&self, account: &AccountId, status: &str) -> u32 {
        let mut state = self.state.lock();
        state
            .presence
            .entry(account.clone())
            .or_insert_with(|| AccountPresence::new(Utc::now()))
            .record_distraction(status)
    }

    pub fn preferred_channel(&self, account: &AccountId) -> Option<Arc<ClientConnection>> {
        self.state.lock().registry.preferred_channel(account)
    }

    pub fn snapshot(&self, account: &AccountId) -> Option<PresenceSnapshot> {
        let state = self.state.lock();
        state.presence.get(account).map(|p| PresenceSnapshot {
            phase: p.phase(),
            pending: p.probe.pending,
            misses: p.probe.misses,
            phase_changed_at: p.phase_changed_at(),
            last_seen: p.last_seen(),
        })
    }

    pub fn stats(&self) -> MonitorStats {
        let state = self.state.lock();
        MonitorStats {
            accounts: state.presence.len(),
            checked_in: state
                .presence
                .values()
                .filter(|p| p.phase() == WorkPhase::CheckedIn)
                .count(),
            channels: state.registry.channel_count(),
        }
    }
}

/// Drop the presence record once the account has no channels and nothing to track.
fn prune(state: &mut MonitorState, account: &AccountId) {
    if state.registry.has_channels(account) {
        return;
    }
    if state.presence.get(account).is_some_and(AccountPresence::is_disposable) {
        let _ = state.presence.remove(account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use shiftwatch_core::IncidentKind;
    use shiftwatch_store::{Database, IncidentRepo, StoreError};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<IncidentRecord>>);

    impl MemorySink {
        fn records(&self) -> Vec<IncidentRecord> {
            self.0.lock().clone()
        }
    }

    impl IncidentSink for MemorySink {
        fn insert_incident(&self, record: &IncidentRecord) -> Result<(), StoreError> {
            self.0.lock().push(record.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl IncidentSink for FailingSink {
        fn insert_incident(&self, _record: &IncidentRecord) -> Result<(), StoreError> {
            Err(StoreError::Database("database is locked".into()))
        }
    }

    fn at(t0: Instant, secs: u64) -> Instant {
        t0 + Duration::from_secs(secs)
    }

    fn config(max: u32) -> LivenessConfig {
        LivenessConfig {
            tick_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(10),
            max_missed_probes: max,
        }
    }

    fn monitor(max: u32) -> (PresenceMonitor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        (PresenceMonitor::new(config(max), sink.clone()), sink)
    }

    fn channel(role: ChannelRole) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(ClientConnection::new(role, tx)), rx)
    }

    fn acct(id: &str) -> AccountId {
        AccountId::from_raw(id)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame.to_string());
        }
        frames
    }

    fn probes(frames: &[String]) -> usize {
        frames.iter().filter(|f| f.contains("liveness-probe")).count()
    }

    /// Bound primary channel for a checked-in account.
    fn checked_in(m: &PresenceMonitor, id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (conn, rx) = channel(ChannelRole::Primary);
        assert_eq!(m.bind(&acct(id), &conn), Ok(true));
        m.apply_status(&acct(id), StatusEvent::CheckIn).unwrap();
        (conn, rx)
    }

    #[test]
    fn no_probes_outside_checked_in() {
        let (m, sink) = monitor(3);
        let t0 = Instant::now();

        let (idle, mut idle_rx) = channel(ChannelRole::Primary);
        m.bind(&acct("idle"), &idle).unwrap();

        let (_brk, mut brk_rx) = checked_in(&m, "break");
        m.apply_status(&acct("break"), StatusEvent::BreakStart).unwrap();

        let (_out, mut out_rx) = checked_in(&m, "out");
        m.apply_status(&acct("out"), StatusEvent::Checkout).unwrap();

        for i in 1..=10 {
            let report = m.tick(at(t0, i * 10));
            assert_eq!(report.evaluated, 0);
        }
        assert!(drain(&mut idle_rx).is_empty());
        assert!(drain(&mut brk_rx).is_empty());
        assert!(drain(&mut out_rx).is_empty());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn secondary_channel_is_never_probed() {
        let (m, _) = monitor(3);
        let (conn, mut rx) = channel(ChannelRole::Secondary);
        m.bind(&acct("a1"), &conn).unwrap();
        m.apply_status(&acct("a1"), StatusEvent::CheckIn).unwrap();

        let report = m.tick(Instant::now());
        assert_eq!(report.evaluated, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn missed_probes_escalate_once() {
        let (m, sink) = monitor(3);
        let (conn, mut rx) = checked_in(&m, "a1");
        let t0 = Instant::now();

        for i in 1..=8 {
            let _ = m.tick(at(t0, i * 10));
        }

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, IncidentKind::Sudden);
        assert_eq!(records[0].reason, IncidentReason::NoHeartbeat);

        let snap = m.snapshot(&acct("a1")).unwrap();
        assert_eq!(snap.phase, WorkPhase::CheckedOut);
        assert!(!snap.pending);
        assert_eq!(snap.misses, 0);
        assert!(!conn.is_open());

        let frames = drain(&mut rx);
        assert_eq!(frames.iter().filter(|f| f.contains("incident-notice")).count(), 1);
    }

    #[test]
    fn ten_second_timeline() {
        let (m, sink) = monitor(3);
        let (_conn, mut rx) = checked_in(&m, "a1");
        let t0 = Instant::now();

        let r = m.tick(at(t0, 10));
        assert_eq!((r.probes_sent, r.misses), (1, 0));
        assert!(m.snapshot(&acct("a1")).unwrap().pending);

        let r = m.tick(at(t0, 20));
        assert_eq!((r.probes_sent, r.misses), (1, 1));
        assert_eq!(m.snapshot(&acct("a1")).unwrap().misses, 1);

        let r = m.tick(at(t0, 30));
        assert_eq!((r.probes_sent, r.misses), (1, 1));
        assert_eq!(m.snapshot(&acct("a1")).unwrap().misses, 2);
        assert!(sink.records().is_empty());

        let r = m.tick(at(t0, 40));
        assert_eq!(r.escalated, vec![acct("a1")]);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(m.snapshot(&acct("a1")).unwrap().phase, WorkPhase::CheckedOut);

        assert_eq!(probes(&drain(&mut rx)), 3);
    }

    #[test]
    fn ack_resets_and_next_tick_probes_again() {
        let (m, sink) = monitor(3);
        let (conn, mut rx) = checked_in(&m, "a1");
        let t0 = Instant::now();

        let _ = m.tick(at(t0, 10));
        let _ = m.tick(at(t0, 20));
        assert_eq!(m.snapshot(&acct("a1")).unwrap().misses, 1);

        let outcome = m.acknowledge(&acct("a1"), &conn, at(t0, 22));
        assert_eq!(outcome, AckOutcome::Accepted { round_trip: Duration::from_secs(2) });
        let snap = m.snapshot(&acct("a1")).unwrap();
        assert!(!snap.pending);
        assert_eq!(snap.misses, 0);
        assert_eq!(snap.last_seen, Some(at(t0, 22)));

        let r = m.tick(at(t0, 30));
        assert_eq!(r.probes_sent, 1);
        assert!(r.escalated.is_empty());
        assert_eq!(m.snapshot(&acct("a1")).unwrap().misses, 0);
        assert!(sink.records().is_empty());
        assert_eq!(probes(&drain(&mut rx)), 3);
    }

    #[test]
    fn unsolicited_ack_is_noop() {
        let (m, sink) = monitor(3);
        let (conn, _rx) = checked_in(&m, "a1");
        let before = m.snapshot(&acct("a1")).unwrap();

        assert_eq!(m.acknowledge(&acct("a1"), &conn, Instant::now()), AckOutcome::NoPendingProbe);
        assert_eq!(m.snapshot(&acct("a1")).unwrap(), before);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn second_primary_supersedes_first() {
        let (m, _) = monitor(3);
        let (old, mut old_rx) = checked_in(&m, "a1");
        let (new, mut new_rx) = channel(ChannelRole::Primary);
        assert_eq!(m.bind(&acct("a1"), &new), Ok(true));
        assert!(old.is_open());

        let preferred = m.preferred_channel(&acct("a1")).unwrap();
        assert_eq!(preferred.id, new.id);

        // naming the account again does not reclaim the slot
        assert_eq!(m.bind(&acct("a1"), &old), Ok(false));

        let t0 = Instant::now();
        let _ = m.tick(at(t0, 10));
        assert_eq!(probes(&drain(&mut new_rx)), 1);
        assert!(drain(&mut old_rx).is_empty());

        assert_eq!(m.acknowledge(&acct("a1"), &old, at(t0, 11)), AckOutcome::StaleChannel);
        assert!(m.snapshot(&acct("a1")).unwrap().pending);
        assert!(matches!(
            m.acknowledge(&acct("a1"), &new, at(t0, 11)),
            AckOutcome::Accepted { .. }
        ));
    }

    #[test]
    fn live_primary_cannot_move_to_another_account() {
        let (m, sink) = monitor(3);
        let (conn, _rx) = checked_in(&m, "a1");

        let err = m.bind(&acct("a2"), &conn).unwrap_err();
        assert_eq!(err.bound, acct("a1"));
        assert_eq!(conn.account(), Some(acct("a1")));
        assert!(m.snapshot(&acct("a2")).is_none());

        let t0 = Instant::now();
        let r = m.tick(at(t0, 10));
        assert_eq!((r.evaluated, r.probes_sent), (1, 1));
        for i in 2..=4 {
            let _ = m.tick(at(t0, i * 10));
        }
        assert_eq!(sink.records().len(), 1);
        assert_eq!(m.snapshot(&acct("a1")).unwrap().phase, WorkPhase::CheckedOut);
    }

    #[test]
    fn idle_connection_can_rebind() {
        let (m, _) = monitor(3);
        let (conn, _rx) = channel(ChannelRole::Primary);
        assert_eq!(m.bind(&acct("a1"), &conn), Ok(true));
        assert_eq!(m.bind(&acct("a2"), &conn), Ok(true));
        assert!(m.snapshot(&acct("a1")).is_none());
        assert_eq!(m.preferred_channel(&acct("a2")).unwrap().id, conn.id);
    }

    #[test]
    fn superseded_close_does_not_escalate() {
        let (m, sink) = monitor(3);
        let (old, _old_rx) = checked_in(&m, "a1");
        let (new, _new_rx) = channel(ChannelRole::Primary);
        m.bind(&acct("a1"), &new).unwrap();

        assert!(m.channel_closed(&old, CloseCause::Dropped).is_none());
        assert!(sink.records().is_empty());
        assert_eq!(m.snapshot(&acct("a1")).unwrap().phase, WorkPhase::CheckedIn);
    }

    #[test]
    fn break_disarms_and_break_end_rearms() {
        let (m, sink) = monitor(3);
        let (_conn, mut rx) = checked_in(&m, "a1");
        let t0 = Instant::now();

        let _ = m.tick(at(t0, 10));
        let _ = m.tick(at(t0, 20));
        assert_eq!(m.snapshot(&acct("a1")).unwrap().misses, 1);

        m.apply_status(&acct("a1"), StatusEvent::BreakStart).unwrap();
        let _ = drain(&mut rx);
        for i in 3..=20 {
            let r = m.tick(at(t0, i * 10));
            assert_eq!(r.probes_sent, 0);
        }
        assert!(drain(&mut rx).is_empty());
        assert!(sink.records().is_empty());

        assert_eq!(m.apply_status(&acct("a1"), StatusEvent::BreakEnd), Ok(WorkPhase::CheckedIn));
        let snap = m.snapshot(&acct("a1")).unwrap();
        assert_eq!(snap.misses, 0);
        assert!(!snap.pending);

        let r = m.tick(at(t0, 210));
        assert_eq!(r.probes_sent, 1);
    }

    #[test]
    fn status_spam_does_not_hold_off_escalation() {
        let (m, sink) = monitor(3);
        let (_conn, _rx) = checked_in(&m, "a1");
        let t0 = Instant::now();

        for i in 1..=4 {
            let _ = m.tick(at(t0, i * 10));
            assert!(m.apply_status(&acct("a1"), StatusEvent::BreakEnd).is_err());
            if i < 4 {
                assert_eq!(m.apply_status(&acct("a1"), StatusEvent::CheckIn), Ok(WorkPhase::CheckedIn));
            }
        }
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].reason, IncidentReason::NoHeartbeat);
    }

    #[test]
    fn abrupt_primary_close_escalates_immediately() {
        let (m, sink) = monitor(30);
        let (conn, _rx) = checked_in(&m, "a1");

        let record = m.channel_closed(&conn, CloseCause::Dropped).unwrap();
        assert_eq!(record.reason, IncidentReason::ClientDisconnected);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].reason, IncidentReason::ClientDisconnected);

        // no channels left and checked out: record is pruned
        assert!(m.snapshot(&acct("a1")).is_none());
        assert_eq!(m.stats(), MonitorStats::default());
    }

    #[test]
    fn abrupt_close_notifies_secondary() {
        let (m, sink) = monitor(30);
        let (primary, _prx) = checked_in(&m, "a1");
        let (secondary, mut srx) = channel(ChannelRole::Secondary);
        m.bind(&acct("a1"), &secondary).unwrap();

        let _ = m.channel_closed(&primary, CloseCause::Dropped).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert_eq!(m.snapshot(&acct("a1")).unwrap().phase, WorkPhase::CheckedOut);
        assert!(!secondary.is_open());
        let frames = drain(&mut srx);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("reauth-required"));

        // the secondary's own close is not an incident
        assert!(m.channel_closed(&secondary, CloseCause::Dropped).is_none());
        assert_eq!(sink.records().len(), 1);
        assert!(m.snapshot(&acct("a1")).is_none());
    }

    #[test]
    fn close_during_break_is_exempt() {
        let (m, sink) = monitor(3);
        let (conn, _rx) = checked_in(&m, "a1");
        m.apply_status(&acct("a1"), StatusEvent::BreakStart).unwrap();

        assert!(m.channel_closed(&conn, CloseCause::Dropped).is_none());
        assert!(sink.records().is_empty());
        assert_eq!(m.snapshot(&acct("a1")).unwrap().phase, WorkPhase::OnBreak);
    }

    #[test]
    fn shutdown_close_is_not_an_incident() {
        let (m, sink) = monitor(3);
        let (conn, _rx) = checked_in(&m, "a1");
        assert!(m.channel_closed(&conn, CloseCause::Shutdown).is_none());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn no_double_count_between_close_and_prober() {
        let (m, sink) = monitor(3);
        let (conn, _rx) = checked_in(&m, "a1");
        let t0 = Instant::now();
        let _ = m.tick(at(t0, 10));
        let _ = m.tick(at(t0, 20));

        let _ = m.channel_closed(&conn, CloseCause::Dropped);
        for i in 3..=10 {
            let _ = m.tick(at(t0, i * 10));
        }
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn fresh_check_in_rearms_detection() {
        let (m, sink) = monitor(2);
        let (_conn, _rx) = checked_in(&m, "a1");
        let t0 = Instant::now();
        for i in 1..=4 {
            let _ = m.tick(at(t0, i * 10));
        }
        assert_eq!(sink.records().len(), 1);

        let (conn2, _rx2) = channel(ChannelRole::Primary);
        m.bind(&acct("a1"), &conn2).unwrap();
        m.apply_status(&acct("a1"), StatusEvent::CheckIn).unwrap();
        for i in 5..=8 {
            let _ = m.tick(at(t0, i * 10));
        }
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn persistence_failure_still_checks_out() {
        let m = PresenceMonitor::new(config(2), Arc::new(FailingSink));
        let (_conn, _rx) = checked_in(&m, "a1");
        let t0 = Instant::now();
        for i in 1..=3 {
            let _ = m.tick(at(t0, i * 10));
        }
        assert_eq!(m.snapshot(&acct("a1")).unwrap().phase, WorkPhase::CheckedOut);
    }

    #[test]
    fn full_queue_send_failure_is_swallowed() {
        let (m, sink) = monitor(3);
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(ClientConnection::new(ChannelRole::Primary, tx));
        m.bind(&acct("a1"), &conn).unwrap();
        m.apply_status(&acct("a1"), StatusEvent::CheckIn).unwrap();
        conn.send(Arc::new("filler".into())).unwrap();

        let r = m.tick(Instant::now());
        assert_eq!(r.send_failures, 1);
        assert_eq!(r.misses, 0);
        assert!(sink.records().is_empty());
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_primary_is_excluded_from_ticks() {
        let (m, _) = monitor(3);
        let (conn, _rx) = checked_in(&m, "a1");
        conn.close();
        let r = m.tick(Instant::now());
        assert_eq!(r.evaluated, 0);
    }

    #[test]
    fn rejected_transition_leaves_phase() {
        let (m, _) = monitor(3);
        let err = m.apply_status(&acct("a1"), StatusEvent::BreakEnd).unwrap_err();
        assert_eq!(err.from, WorkPhase::Idle);
        assert_eq!(m.snapshot(&acct("a1")).unwrap().phase, WorkPhase::Idle);
    }

    #[test]
    fn stats_count_accounts_and_channels() {
        let (m, _) = monitor(3);
        let (_a, _arx) = checked_in(&m, "a1");
        let (b, _brx) = channel(ChannelRole::Secondary);
        m.bind(&acct("a2"), &b).unwrap();
        assert_eq!(
            m.stats(),
            MonitorStats { accounts: 2, checked_in: 1, channels: 2 }
        );
    }

    #[test]
    fn idle_account_pruned_on_close() {
        let (m, _) = monitor(3);
        let (conn, _rx) = channel(ChannelRole::Primary);
        m.bind(&acct("a1"), &conn).unwrap();
        assert!(m.channel_closed(&conn, CloseCause::Dropped).is_none());
        assert!(m.snapshot(&acct("a1")).is_none());
    }

    #[test]
    fn distraction_streak_per_account() {
        let (m, _) = monitor(3);
        assert_eq!(m.record_distraction(&acct("a1"), "NO ACTIVE"), 1);
        assert_eq!(m.record_distraction(&acct("a1"), "NO ACTIVE"), 2);
        assert_eq!(m.record_distraction(&acct("a2"), "NO ACTIVE"), 1);
        assert_eq!(m.record_distraction(&acct("a1"), "ACTIVE"), 0);
    }

    #[test]
    fn incident_lands_in_sqlite() {
        let db = Database::in_memory().unwrap();
        let m = PresenceMonitor::new(config(3), Arc::new(IncidentRepo::new(db.clone())));
        let (conn, _rx) = checked_in(&m, "a1");
        let _ = m.channel_closed(&conn, CloseCause::Dropped);

        let reason: String = db
            .with_conn(|c| {
                c.query_row("SELECT reason FROM incident_sessions WHERE account_id = 'a1'", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(reason, "client disconnected");
    }
}
