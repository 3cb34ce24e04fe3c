//! One viewer's `WebSocket` session, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use gomer_core::{ConnectionId, Inbound, parse_inbound};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use crate::coordinator::SessionCoordinator;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Per-session timing and queue limits.
#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    /// Outbound queue depth.
    pub queue_capacity: usize,
    /// How long a send may wait for queue capacity.
    pub send_timeout: Duration,
    /// Interval between Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the viewer is dropped.
    pub pong_timeout: Duration,
}

/// Run a viewer session.
///
/// 1. Registers the connection and queues the current buffer
/// 2. Forwards queued frames to the socket, with periodic Ping frames
/// 3. Applies inbound `codeUpdate` frames through the coordinator
/// 4. Unregisters on close, read error, malformed input or shutdown
#[instrument(skip_all, fields(connection_id = %id))]
pub async fn run_ws_session(
    ws: WebSocket,
    id: ConnectionId,
    coordinator: Arc<SessionCoordinator>,
    limits: SessionLimits,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(limits.queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(id.clone(), send_tx, limits.send_timeout));

    info!("viewer connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let outbound_conn = connection.clone();
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(limits.ping_interval);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive() && outbound_conn.last_pong_elapsed() > limits.pong_timeout {
                        warn!(timeout = ?limits.pong_timeout, "viewer unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    if let Err(e) = coordinator.connect(connection.clone()) {
        warn!(error = %e, "failed to queue current buffer");
    }

    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => {
                debug!("shutdown requested");
                break;
            }
            // The writer stops on a dead socket or a pong timeout.
            () = connection.closed() => break,
            frame = ws_rx.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!(len = data.len(), "non-UTF-8 binary frame, closing");
                    break;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                connection.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(error = %e, "read failed");
                break;
            }
        };
        connection.mark_alive();

        match parse_inbound(&text) {
            Ok(Inbound::CodeUpdate(code)) => {
                // Broadcast failures are logged by the coordinator.
                let _ = coordinator.code_update(&id, code).await;
            }
            Ok(Inbound::Ignored(kind)) => warn!(kind, "ignoring viewer message"),
            Err(e) => {
                warn!(error = %e, "closing connection");
                break;
            }
        }
    }

    coordinator.disconnect(&id);
    outbound.abort();
    let age = connection.age();
    info!(
        dropped = connection.drop_count(),
        duration_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
        "viewer disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
}

