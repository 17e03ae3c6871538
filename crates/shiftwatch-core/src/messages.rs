//! Wire shapes exchanged over a client channel.
//!
//! Every frame is a JSON object discriminated by its `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AccountId;

/// Inbound `type` values the gateway understands (`pong` is the legacy ack name).
pub const KNOWN_TYPES: &[&str] = &[
    "check-in",
    "checkout",
    "break-start",
    "break-end",
    "liveness-ack",
    "pong",
    "log-distraction",
];

/// Distraction status that extends the consecutive-inactivity streak.
pub const NO_ACTIVE_STATUS: &str = "NO ACTIVE";

/// A decoded client frame.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    CheckIn {
        account_id: Option<AccountId>,
    },
    Checkout {
        account_id: Option<AccountId>,
    },
    BreakStart {
        account_id: Option<AccountId>,
    },
    BreakEnd {
        account_id: Option<AccountId>,
    },
    #[serde(alias = "pong")]
    LivenessAck {
        account_id: Option<AccountId>,
    },
    LogDistraction {
        account_id: Option<AccountId>,
        status: Option<String>,
        created_at: Option<DateTime<Utc>>,
    },
}

impl InboundMessage {
    /// Account named by the frame, if any.
    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            Self::CheckIn { account_id }
            | Self::Checkout { account_id }
            | Self::BreakStart { account_id }
            | Self::BreakEnd { account_id }
            | Self::LivenessAck { account_id }
            | Self::LogDistraction { account_id, .. } => account_id.as_ref(),
        }
    }

    /// The presence transition this frame requests, if it is a status event.
    pub fn status_event(&self) -> Option<StatusEvent> {
        match self {
            Self::CheckIn { .. } => Some(StatusEvent::CheckIn),
            Self::Checkout { .. } => Some(StatusEvent::Checkout),
            Self::BreakStart { .. } => Some(StatusEvent::BreakStart),
            Self::BreakEnd { .. } => Some(StatusEvent::BreakEnd),
            Self::LivenessAck { .. } | Self::LogDistraction { .. } => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CheckIn { .. } => "check-in",
            Self::Checkout { .. } => "checkout",
            Self::BreakStart { .. } => "break-start",
            Self::BreakEnd { .. } => "break-end",
            Self::LivenessAck { .. } => "liveness-ack",
            Self::LogDistraction { .. } => "log-distraction",
        }
    }
}

/// Explicit client-driven presence transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusEvent {
    CheckIn,
    BreakStart,
    BreakEnd,
    Checkout,
}

impl StatusEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckIn => "check-in",
            Self::BreakStart => "break-start",
            Self::BreakEnd => "break-end",
            Self::Checkout => "checkout",
        }
    }
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{0}")]
    InvalidJson(String),
    #[error("Missing message type")]
    MissingType,
    #[error("Unknown message type")]
    UnknownType(String),
    #[error("Invalid message: {0}")]
    InvalidFields(String),
}

/// Decode a text frame, distinguishing a missing or unknown `type` from bad fields.
pub fn decode(text: &str) -> Result<InboundMessage, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let type_name = match value.get("type") {
        Some(serde_json::Value::String(t)) if !t.is_empty() => t.clone(),
        Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {
            return Err(DecodeError::MissingType)
        }
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
    };

    if !KNOWN_TYPES.contains(&type_name.as_str()) {
        return Err(DecodeError::UnknownType(type_name));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::InvalidFields(e.to_string()))
}

/// Reason code carried by an incident notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NoticeStatus {
    #[serde(rename = "reauth-required")]
    ReauthRequired,
}

/// Server-initiated frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    LivenessProbe,
    IncidentNotice { status: NoticeStatus, message: String },
}

impl OutboundMessage {
    pub fn reauth_notice(message: impl Into<String>) -> Self {
        Self::IncidentNotice {
            status: NoticeStatus::ReauthRequired,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Direct reply to a client request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GatewayReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl GatewayReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            phase: None,
        }
    }

    pub fn with_phase(phase: impl Into<String>) -> Self {
        Self {
            phase: Some(phase.into()),
            ..Self::ok()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            phase: None,
        }
    }
}
