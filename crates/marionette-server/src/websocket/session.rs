//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use marionette_core::ConnectionId;
use marionette_rpc::outbox::{self, Frame};
use marionette_rpc::ConnectionSession;
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, instrument, warn};

use super::Gateway;
use super::connection::ClientConnection;
use super::handler::handle_message;

/// How long queued replies may take to flush after the session ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Run one client connection to completion.
///
/// Frames are dispatched one at a time, so every request (cascades
/// included) finishes before the next frame is read. A writer task drains
/// the session's outbox and pings the client; a client that stops answering
/// is dropped. On exit the session is closed, which releases its project
/// and deregisters the connection.
#[instrument(skip_all, fields(connection_id = %id))]
pub async fn run_ws_session(ws: WebSocket, id: ConnectionId, gateway: Gateway) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (outbox, mut frames) = outbox::channel(gateway.outbound_queue);
    let connection = Arc::new(ClientConnection::new(id.clone()));

    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);
    gateway.connections.add(connection.clone()).await;

    let mut session = ConnectionSession::new(id, gateway.services.clone(), outbox);

    let writer_conn = connection.clone();
    let (interval, pong_timeout) = (gateway.heartbeat_interval, gateway.pong_timeout);
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(interval);
        // the first tick fires immediately
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    let message = match frame {
                        Frame::Text(text) => Message::Text(text.into()),
                        Frame::Binary(bytes) => Message::Binary(bytes),
                    };
                    if ws_tx.send(message).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if writer_conn.is_unresponsive(pong_timeout) {
                        warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });
    let mut writer_done = false;

    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            _ = &mut writer => {
                writer_done = true;
                debug!("writer stopped");
                break;
            }
            () = gateway.shutdown.cancelled() => {
                info!("server shutting down, closing connection");
                break;
            }
        };
        let Some(Ok(message)) = next else { break };

        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    info!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                continue;
            }
        };

        connection.begin_dispatch();
        let _ = handle_message(&text, &gateway.registry, &mut session).await;
        connection.end_dispatch();
        if session.is_closed() {
            debug!("session closed by request");
            break;
        }
    }

    session.close().await;
    // dropping the session drops the outbox, which ends the writer once the
    // queue is drained
    drop(session);
    if !writer_done && tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(age_secs = connection.age().as_secs(), "client disconnected");
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection.age().as_secs_f64());
}
