//! # shiftwatch-core
//!
//! Shared identifiers, wire message shapes and incident records used by the
//! store and server crates.

pub mod ids;
pub mod incident;
pub mod messages;

pub use ids::{AccountId, ConnectionId};
pub use incident::{IncidentKind, IncidentReason, IncidentRecord};
pub use messages::{DecodeError, GatewayReply, InboundMessage, NoticeStatus, OutboundMessage, StatusEvent};
