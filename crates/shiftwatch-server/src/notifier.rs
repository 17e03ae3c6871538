//! Escalation of lost liveness into SUDDEN incidents.
//!
//! Escalation is split in two: [`IncidentNotifier::disarm`] runs under the
//! monitor lock and applies the in-memory transition, then
//! [`IncidentNotifier::persist`] writes the record after the lock is released.

use std::sync::Arc;

use chrono::Utc;
use shiftwatch_core::{AccountId, IncidentReason, IncidentRecord, OutboundMessage};
use shiftwatch_store::IncidentSink;
use tracing::{debug, error, warn};

use crate::connection::ClientConnection;
use crate::presence::AccountPresence;

/// Text of the re-check-in notice sent on escalation.
pub const REAUTH_MESSAGE: &str = "SUDDEN - Please check in again to work";

pub struct IncidentNotifier {
    sink: Arc<dyn IncidentSink>,
}

impl IncidentNotifier {
    pub fn new(sink: Arc<dyn IncidentSink>) -> Self {
        Self { sink }
    }

    /// Force the account out of CheckedIn, notify and retire every open channel,
    /// and return the incident to persist.
    pub fn disarm(
        &self,
        account: &AccountId,
        presence: &mut AccountPresence,
        channels: &[Arc<ClientConnection>],
        reason: IncidentReason,
    ) -> IncidentRecord {
        let now = Utc::now();
        presence.force_checkout(now);

        let notice = OutboundMessage::reauth_notice(REAUTH_MESSAGE);
        let mut notified = 0usize;
        for channel in channels.iter().filter(|c| c.is_open()) {
            match channel.send_message(&notice) {
                Ok(()) => notified += 1,
                Err(e) => debug!(account_id = %account, conn_id = %channel.id, error = %e, "incident notice not delivered"),
            }
            channel.close();
        }

        warn!(account_id = %account, reason = %reason, notified, "liveness lost, account checked out");
        IncidentRecord::sudden(account.clone(), reason, now)
    }

    /// Write the record to the durable sink. Failures are logged and dropped.
    pub fn persist(&self, record: &IncidentRecord) -> bool {
        match self.sink.insert_incident(record) {
            Ok(()) => true,
            Err(e) => {
                error!(account_id = %record.account_id, reason = %record.reason, error = %e, "failed to persist incident");
                false
            }
        }
    }
}
