//! Socket lifecycle for one client channel, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use shiftwatch_core::GatewayReply;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::{ClientConnection, CloseCause};
use crate::gateway::Gateway;

/// How long the writer gets to flush and send a close frame after the reader ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Run a client channel until the peer goes away, the channel is retired, or
/// the server shuts down.
///
/// Outbound frames are queued on `outbound_rx` by [`ClientConnection::send`]
/// and forwarded by a writer task; inbound text frames go to the gateway.
#[instrument(skip_all, fields(conn_id = %conn.id, role = %conn.role))]
pub async fn serve_connection(
    socket: WebSocket,
    conn: Arc<ClientConnection>,
    mut outbound_rx: mpsc::Receiver<Arc<String>>,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
) -> CloseCause {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_conn = Arc::clone(&conn);
    let writer_shutdown = shutdown.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = outbound_rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_conn.closed() => {
                    // flush anything queued before the close (e.g. an incident notice)
                    while let Ok(text) = outbound_rx.try_recv() {
                        if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                () = writer_shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut writer_done = false;
    let cause = loop {
        tokio::select! {
            () = shutdown.cancelled() => break CloseCause::Shutdown,
            _ = &mut writer => {
                writer_done = true;
                break CloseCause::Dropped;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(&gateway, &conn, text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => dispatch(&gateway, &conn, text),
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("client sent close frame");
                    break CloseCause::Dropped;
                }
                Some(Err(e)) => {
                    debug!(error = %e, "socket read failed");
                    break CloseCause::Dropped;
                }
                None => break CloseCause::Dropped,
            }
        }
    };

    conn.close();
    if !writer_done && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(?cause, age_ms = conn.age().as_millis() as u64, dropped = conn.drop_count(), "channel ended");
    cause
}

fn dispatch(gateway: &Gateway, conn: &Arc<ClientConnection>, text: &str) {
    let Some(reply) = gateway.handle_text(conn, text) else {
        return;
    };
    send_reply(conn, &reply);
}

fn send_reply(conn: &ClientConnection, reply: &GatewayReply) {
    let json = match serde_json::to_string(reply) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to encode reply");
            return;
        }
    };
    if let Err(e) = conn.send(Arc::new(json)) {
        debug!(error = %e, "reply not queued");
    }
}
