//! Inbound frame dispatch: decode, bind the account, route to the monitor.

use std::sync::Arc;

use chrono::Utc;
use shiftwatch_core::messages::{self, InboundMessage};
use shiftwatch_core::{AccountId, GatewayReply};
use shiftwatch_store::{DistractionRecord, DistractionRepo};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::connection::ClientConnection;
use crate::monitor::PresenceMonitor;

pub struct Gateway {
    monitor: Arc<PresenceMonitor>,
    distractions: DistractionRepo,
}

impl Gateway {
    pub fn new(monitor: Arc<PresenceMonitor>, distractions: DistractionRepo) -> Self {
        Self { monitor, distractions }
    }

    #[cfg(test)]
    fn monitor(&self) -> &Arc<PresenceMonitor> {
        &self.monitor
    }

    /// Handle one text frame from `conn`. Returns the reply to send back, if any.
    pub fn handle_text(&self, conn: &Arc<ClientConnection>, text: &str) -> Option<GatewayReply> {
        let message = match messages::decode(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(conn_id = %conn.id, error = %e, "rejected frame");
                return Some(GatewayReply::failure(e.to_string()));
            }
        };

        let is_ack = matches!(message, InboundMessage::LivenessAck { .. });
        let account = match message.account_id() {
            Some(account) => match self.monitor.bind(account, conn) {
                Ok(_) => account.clone(),
                Err(_) if is_ack => return None,
                Err(e) => return Some(GatewayReply::failure(e.to_string())),
            },
            None => match conn.account() {
                Some(bound) => bound,
                None if is_ack => {
                    debug!(conn_id = %conn.id, "ack on unbound connection");
                    return None;
                }
                None => return Some(GatewayReply::failure("Missing account_id")),
            },
        };

        if let Some(event) = message.status_event() {
            return Some(match self.monitor.apply_status(&account, event) {
                Ok(phase) => GatewayReply::with_phase(phase.as_str()),
                Err(e) => GatewayReply::failure(e.to_string()),
            });
        }

        match message {
            InboundMessage::LivenessAck { .. } => {
                let _ = self.monitor.acknowledge(&account, conn, Instant::now());
                None
            }
            InboundMessage::LogDistraction { status, created_at, .. } => {
                Some(self.log_distraction(account, status, created_at))
            }
            other => {
                warn!(kind = other.type_name(), "unrouted message");
                None
            }
        }
    }

    fn log_distraction(
        &self,
        account: AccountId,
        status: Option<String>,
        created_at: Option<chrono::DateTime<Utc>>,
    ) -> GatewayReply {
        let status = status.unwrap_or_else(|| "unknown".to_owned());
        let note = self.monitor.record_distraction(&account, &status);
        let record = DistractionRecord {
            account_id: account,
            status,
            note,
            created_at: created_at.unwrap_or_else(Utc::now),
        };
        match self.distractions.insert(&record) {
            Ok(()) => GatewayReply::ok(),
            Err(e) => {
                error!(account_id = %record.account_id, error = %e, "failed to log distraction");
                GatewayReply::failure(e.to_string())
            }
        }
    }
}
