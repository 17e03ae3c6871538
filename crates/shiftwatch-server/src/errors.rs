//! Transport-level failures. None of these are fatal; callers log and continue.

/// A send on a client channel did not reach its outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
    #[error("send queue full")]
    QueueFull,
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// A connection tried to move to another account while it still carries an
/// active session for the first one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Connection is bound to account {bound}")]
pub struct BindError {
    pub bound: shiftwatch_core::AccountId,
}
