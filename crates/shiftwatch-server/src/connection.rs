//! A live client channel: outbound queue, close signal, role and bound account.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shiftwatch_core::{AccountId, ConnectionId, OutboundMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;

/// Role declared by the client when it connects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    /// Long-lived; the only role subject to liveness probing.
    #[default]
    Primary,
    /// Short-lived auxiliary connection; never probed.
    Secondary,
}

impl ChannelRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a channel's socket task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCause {
    /// Peer went away or the transport failed.
    Dropped,
    /// The server is shutting down.
    Shutdown,
}

/// Represents a connected client channel.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub role: ChannelRole,
    tx: mpsc::Sender<Arc<String>>,
    closer: CancellationToken,
    account: Mutex<Option<AccountId>>,
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(role: ChannelRole, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id: ConnectionId::new(),
            role,
            tx,
            closer: CancellationToken::new(),
            account: Mutex::new(None),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame without waiting.
    pub fn send(&self, message: Arc<String>) -> Result<(), TransportError> {
        if self.closer.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    pub fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let json = message
            .encode()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.send(Arc::new(json))
    }

    /// Open until retired by the server or the socket writer goes away.
    pub fn is_open(&self) -> bool {
        !self.closer.is_cancelled() && !self.tx.is_closed()
    }

    /// Retire the channel. The socket task sends a close frame and exits.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closer.cancelled().await;
    }

    pub fn account(&self) -> Option<AccountId> {
        self.account.lock().clone()
    }

    pub(crate) fn bind_account(&self, account: AccountId) {
        *self.account.lock() = Some(account);
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(cap: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(cap);
        (ClientConnection::new(ChannelRole::Primary, tx), rx)
    }

    #[test]
    fn role_defaults_to_primary() {
        assert_eq!(ChannelRole::default(), ChannelRole::Primary);
        let role: ChannelRole = serde_json::from_str(r#""secondary""#).unwrap();
        assert_eq!(role, ChannelRole::Secondary);
    }

    #[tokio::test]
    async fn send_probe_frame() {
        let (conn, mut rx) = make_connection(4);
        conn.send_message(&OutboundMessage::LivenessProbe).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, r#"{"type":"liveness-probe"}"#);
    }

    #[test]
    fn full_queue_counts_drop() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("a".into())).is_ok());
        assert_eq!(conn.send(Arc::new("b".into())), Err(TransportError::QueueFull));
        assert_eq!(conn.drop_count(), 1);
        assert!(conn.is_open());
    }

    #[test]
    fn dropped_receiver_means_closed() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(conn.send(Arc::new("x".into())), Err(TransportError::Closed));
    }

    #[test]
    fn close_rejects_sends() {
        let (conn, _rx) = make_connection(4);
        conn.close();
        assert!(!conn.is_open());
        assert_eq!(
            conn.send_message(&OutboundMessage::LivenessProbe),
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let (conn, _rx) = make_connection(4);
        let conn = Arc::new(conn);
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close();
        waiter.await.unwrap();
    }

    #[test]
    fn bind_account_roundtrip() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.account().is_none());
        conn.bind_account(AccountId::from_raw("a1"));
        assert_eq!(conn.account(), Some(AccountId::from_raw("a1")));
    }
}
