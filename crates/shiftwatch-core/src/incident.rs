//! Incident records raised when an active session loses liveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AccountId;

/// Incident classification. This subsystem only ever raises `Sudden`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    Sudden,
}

impl IncidentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sudden => "SUDDEN",
        }
    }
}

/// Why liveness was declared lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentReason {
    /// The prober hit the miss threshold.
    NoHeartbeat,
    /// The primary channel closed while the account was checked in.
    ClientDisconnected,
}

impl IncidentReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoHeartbeat => "no heartbeat response",
            Self::ClientDisconnected => "client disconnected",
        }
    }
}

impl std::fmt::Display for IncidentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record written once per escalation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub account_id: AccountId,
    pub kind: IncidentKind,
    pub reason: IncidentReason,
    pub created_at: DateTime<Utc>,
}

impl IncidentRecord {
    pub fn sudden(account_id: AccountId, reason: IncidentReason, created_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            kind: IncidentKind::Sudden,
            reason,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_value() {
        assert_eq!(IncidentKind::Sudden.as_str(), "SUDDEN");
        assert_eq!(serde_json::to_string(&IncidentKind::Sudden).unwrap(), r#""SUDDEN""#);
    }

    #[test]
    fn reason_text() {
        assert_eq!(IncidentReason::NoHeartbeat.as_str(), "no heartbeat response");
        assert_eq!(IncidentReason::ClientDisconnected.to_string(), "client disconnected");
    }

    #[test]
    fn sudden_constructor() {
        let now = Utc::now();
        let rec = IncidentRecord::sudden(AccountId::from_raw("a1"), IncidentReason::NoHeartbeat, now);
        assert_eq!(rec.kind, IncidentKind::Sudden);
        assert_eq!(rec.created_at, now);
    }
}
