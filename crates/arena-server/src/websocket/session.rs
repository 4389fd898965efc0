//! WebSocket session lifecycle: one authenticated client from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arena_core::ids::{ConnectionId, UserId};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::hub::ArenaHub;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodRegistry;
use crate::rpc::types::RpcEvent;

/// How long the writer gets to flush a close frame after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent a close frame.
    ClientClosed,
    /// Socket errored or the stream ended without a close frame.
    StreamEnded,
    /// No pong within the heartbeat timeout.
    HeartbeatTimeout,
    /// Server is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Metric label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::StreamEnded => "stream_ended",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Shared pieces every session needs.
#[derive(Clone)]
pub struct SessionDeps {
    /// Coordination state.
    pub hub: Arc<ArenaHub>,
    /// RPC method table.
    pub registry: Arc<MethodRegistry>,
    /// Listener configuration.
    pub config: Arc<ServerConfig>,
    /// Server-wide shutdown token; each session runs on a child of it.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
}

/// The first event on every connection.
pub fn established_event(connection_id: &ConnectionId, user_id: &UserId) -> RpcEvent {
    RpcEvent::new(
        "connection.established",
        Some(serde_json::json!({
            "connectionId": connection_id,
            "userId": user_id,
        })),
    )
}

/// Run a WebSocket session for an authenticated user.
///
/// 1. Registers the connection with the hub and sends `connection.established`
/// 2. Forwards queued frames and periodic Pings on a writer task
/// 3. Watches liveness on a heartbeat task
/// 4. Dispatches inbound text (or UTF-8 binary) frames as RPC requests
/// 5. Hands the connection to `ArenaHub::on_disconnect` when anything ends
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn run_ws_session(ws: WebSocket, user_id: UserId, deps: SessionDeps) -> DisconnectReason {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) =
        mpsc::channel::<Arc<String>>(deps.config.send_queue_capacity.max(1));
    let connection = deps.hub.on_connect(Arc::new(ClientConnection::new(
        ConnectionId::generate(),
        user_id,
        send_tx,
    )));
    let connection_id = connection.id.clone();

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let established = established_event(&connection.id, &connection.user_id);
    if let Ok(json) = serde_json::to_string(&established) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    let session_cancel = deps.shutdown.child_token();

    // Writer: queued frames, Pings, and a close frame on cancellation.
    let writer_cancel = session_cancel.clone();
    let ping_every = deps.config.heartbeat_interval();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(String::clone(&frame).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let heartbeat_conn = Arc::clone(&connection);
    let heartbeat_cancel = session_cancel.clone();
    let (interval, timeout) = (deps.config.heartbeat_interval(), deps.config.heartbeat_timeout());
    let heartbeat = tokio::spawn(async move {
        let result =
            run_heartbeat(heartbeat_conn, interval, timeout, heartbeat_cancel.clone()).await;
        if result == HeartbeatResult::TimedOut {
            warn!(?timeout, "client unresponsive, disconnecting");
            heartbeat_cancel.cancel();
        }
        result
    });

    let ctx = RpcContext {
        hub: Arc::clone(&deps.hub),
        connection: Arc::clone(&connection),
        server_start_time: deps.start_time,
    };

    let reason = loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = session_cancel.cancelled() => {
                break if deps.shutdown.is_cancelled() {
                    DisconnectReason::Shutdown
                } else {
                    DisconnectReason::HeartbeatTimeout
                };
            }
        };
        let Some(Ok(msg)) = msg else {
            break DisconnectReason::StreamEnded;
        };

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => break DisconnectReason::ClientClosed,
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                continue;
            }
        };
        connection.mark_alive();

        let result = handle_message(&text, &deps.registry, &ctx).await;
        if !connection.send(Arc::new(result.response_json)) {
            warn!(method = result.method, "failed to enqueue response");
        }
    };

    session_cancel.cancel();
    deps.hub.on_disconnect(&connection_id);
    let _ = heartbeat.await;
    let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;

    info!(%connection_id, reason = reason.as_str(), "session ended");
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    reason
}
