//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use gamehub_core::{FrameError, GameEvent, now_millis};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::registry::{SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON};
use crate::config::ServerConfig;
use crate::metrics::{
    HUB_MALFORMED_FRAMES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
};
use crate::protocol;
use crate::server::AppState;

/// Longest slice of a rejected frame echoed into the log.
const MAX_LOGGED_FRAME_CHARS: usize = 200;

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection and sends `server_welcome`
/// 2. Parses incoming text (or UTF-8 binary) frames and dispatches events
/// 3. Forwards queued envelopes and periodic pings from a writer task
/// 4. Unregisters and logs the close code on disconnect
pub async fn run_ws_session(ws: WebSocket, remote_addr: Option<SocketAddr>, state: AppState) {
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(state.config.send_queue_capacity.max(1));
    let connection = admit(&state, send_tx, remote_addr).await;
    drive_session(ws, send_rx, connection, state).await;
}

/// Register a freshly upgraded connection.
///
/// An upgrade accepted just before shutdown can register after the drain
/// has already walked the registry, so it closes itself here instead.
pub(crate) async fn admit(
    state: &AppState,
    send_tx: mpsc::Sender<Arc<String>>,
    remote_addr: Option<SocketAddr>,
) -> Arc<ClientConnection> {
    let connection = state.registry.register(send_tx, remote_addr).await;
    if state.shutdown.is_shutting_down() {
        debug!(client_id = %connection.id, "registered during shutdown, closing");
        connection.request_close(SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON);
    }
    connection
}

#[instrument(skip_all, fields(client_id = %connection.id))]
async fn drive_session(
    ws: WebSocket,
    send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    state: AppState,
) {
    let config = Arc::clone(&state.config);
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Sent before the writer starts so it always precedes queued envelopes.
    match protocol::welcome_frame(&connection.id, &config.welcome_message, now_millis()) {
        Ok(json) => {
            match time::timeout(config.send_timeout(), ws_tx.send(Message::Text(json.into()))).await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "failed to send welcome frame");
                    connection.request_close(close_code::ABNORMAL, "");
                }
                Err(_) => {
                    warn!("welcome frame timed out");
                    connection.request_close(close_code::ABNORMAL, "");
                }
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize welcome frame"),
    }

    let mut outbound = tokio::spawn(run_outbound(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        Arc::clone(&config),
    ));

    let mut peer_close: Option<(u16, String)> = None;
    loop {
        let frame = tokio::select! {
            biased;
            () = connection.closed() => break,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(error = %e, "websocket transport error");
                peer_close = Some((close_code::ABNORMAL, e.to_string()));
                break;
            }
            None => {
                debug!("stream ended without close frame");
                peer_close = Some((close_code::ABNORMAL, String::new()));
                break;
            }
        };

        connection.mark_alive();
        match msg {
            Message::Text(text) => {
                handle_frame(&state, &connection, GameEvent::parse(text.as_str()), text.as_str())
                    .await;
            }
            Message::Binary(data) => {
                let parsed = GameEvent::parse_bytes(&data);
                handle_frame(&state, &connection, parsed, &String::from_utf8_lossy(&data)).await;
            }
            Message::Close(frame) => {
                peer_close = Some(frame.map_or((close_code::STATUS, String::new()), |f| {
                    (f.code, f.reason.to_string())
                }));
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Leave the broadcast set before tearing down the writer.
    let _ = state.registry.unregister(&connection.id).await;
    connection.request_close(close_code::NORMAL, "");
    if time::timeout(config.send_timeout(), &mut outbound).await.is_err() {
        debug!("writer did not finish in time, aborting");
        outbound.abort();
    }
    let _ = connection.advance(super::connection::ConnectionState::Closed);

    let (code, reason) = match peer_close {
        Some(peer) => peer,
        None => connection
            .close_request()
            .map_or((close_code::NORMAL, String::new()), |r| (r.code, r.reason.to_owned())),
    };
    let reason = if reason.is_empty() {
        "No reason provided".to_owned()
    } else {
        reason
    };
    let duration = connection.age();
    info!(
        code,
        reason,
        remaining_clients = state.registry.connection_count(),
        duration_secs = duration.as_secs_f64(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Dispatch a parsed frame or log why it was rejected.
async fn handle_frame(
    state: &AppState,
    connection: &ClientConnection,
    parsed: Result<GameEvent, FrameError>,
    raw: &str,
) {
    let received_at = now_millis();
    match parsed {
        Ok(event) => {
            let _ = state.engine.dispatch(&event, &connection.id, received_at).await;
        }
        Err(e) => {
            counter!(HUB_MALFORMED_FRAMES_TOTAL).increment(1);
            warn!(error = %e, frame = preview(raw), "failed to parse message");
        }
    }
}

/// Owns the sink: forwards queued envelopes, pings, and the final close frame.
///
/// Every write is bounded by `send_timeout`; a stalled peer is closed with
/// 1006 without holding up anyone else.
async fn run_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    config: Arc<ServerConfig>,
) {
    let send_timeout = config.send_timeout();
    let pong_timeout = config.pong_timeout();
    let mut ping_interval = time::interval(config.ping_interval());
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => break,
            msg = send_rx.recv() => {
                let Some(text) = msg else {
                    // Sender released by unregister; the close request follows.
                    connection.closed().await;
                    break;
                };
                let write = ws_tx.send(Message::Text(text.as_str().into()));
                if !bounded_write(write, send_timeout, &connection, "envelope").await {
                    return;
                }
            }
            _ = ping_interval.tick() => {
                if connection.last_pong_elapsed() > pong_timeout {
                    warn!("client unresponsive for {pong_timeout:?}, disconnecting");
                    connection.request_close(close_code::POLICY, "Pong timeout");
                    continue;
                }
                let write = ws_tx.send(Message::Ping(Vec::new().into()));
                if !bounded_write(write, send_timeout, &connection, "ping").await {
                    return;
                }
            }
        }
    }

    // 1006 is reserved for local reporting and never goes on the wire.
    let frame = connection
        .close_request()
        .filter(|r| r.code != close_code::ABNORMAL)
        .map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        });
    match time::timeout(send_timeout, ws_tx.send(Message::Close(frame))).await {
        Ok(Ok(())) => {}
        // Peer may have closed first.
        Ok(Err(e)) => debug!(error = %e, "close frame not sent"),
        Err(_) => debug!("close frame timed out"),
    }
}

/// Await one socket write. On failure or timeout the connection is asked to
/// close abnormally and `false` is returned.
async fn bounded_write<F, E>(
    write: F,
    send_timeout: Duration,
    connection: &ClientConnection,
    what: &'static str,
) -> bool
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match time::timeout(send_timeout, write).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error = %e, frame = what, "write failed, closing connection");
            connection.request_close(close_code::ABNORMAL, "");
            false
        }
        Err(_) => {
            warn!(
                frame = what,
                timeout_ms = send_timeout.as_millis() as u64,
                "write timed out, closing connection"
            );
            connection.request_close(close_code::ABNORMAL, "");
            false
        }
    }
}

/// Leading characters of `raw`, cut on a char boundary.
fn preview(raw: &str) -> &str {
    raw.char_indices()
        .nth(MAX_LOGGED_FRAME_CHARS)
        .map_or(raw, |(i, _)| &raw[..i])
}
