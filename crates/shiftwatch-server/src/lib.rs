//! # shiftwatch-server
//!
//! Presence tracking and liveness detection for remote workers' monitoring
//! clients, served over Axum WebSockets.
//!
//! - [`registry`]: open channels per account, primary vs secondary role
//! - [`presence`]: work-phase state machine and probe bookkeeping
//! - [`prober`]: periodic liveness probing of checked-in accounts
//! - [`notifier`]: escalation of lost liveness into SUDDEN incidents
//! - [`monitor`]: the single lock that ties the above together
//! - [`gateway`]: inbound frame decode and dispatch
//! - [`server`]: HTTP routes, socket lifecycle, startup

pub mod config;
pub mod connection;
pub mod errors;
pub mod gateway;
pub mod monitor;
pub mod notifier;
pub mod presence;
pub mod prober;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{LivenessConfig, ServerConfig};
pub use connection::{ChannelRole, ClientConnection, CloseCause};
pub use gateway::Gateway;
pub use monitor::{MonitorStats, PresenceMonitor, PresenceSnapshot};
pub use presence::{AckOutcome, WorkPhase};
pub use server::{start, ServerHandle};
pub use shutdown::ShutdownCoordinator;
