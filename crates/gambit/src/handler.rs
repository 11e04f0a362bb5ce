//! Per-connection handler: admission, message routing, and delivery.
//!
//! Each accepted TCP socket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Admission: claim a per-IP slot, then finish the WebSocket upgrade
//!   2. Register an outbox with the orchestrator
//!   3. Loop until the socket closes, goes quiet, or the server closes:
//!      - inbound frame → rate limit → decode → orchestrator
//!      - outbox message → encode → socket
//!      - keepalive tick → ping; the pong counts as activity

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gambit_protocol::{
    Codec, ConnectionId, ErrorCode, ServerMessage, decode_client_message, encode_server_message,
};
use gambit_resilience::{ShutdownPhase, contain};
use gambit_transport::{Connection, Inbound, Incoming, WebSocketConnection, WebSocketHandshake};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::GambitError;
use crate::server::ServerState;

/// Floor for the ping interval; a zero period would spin.
const MIN_KEEPALIVE: Duration = Duration::from_millis(10);

/// Holds one of the address's connection slots until dropped.
struct AddressSlot<C: Codec> {
    ip: IpAddr,
    state: Arc<ServerState<C>>,
}

impl<C: Codec> Drop for AddressSlot<C> {
    fn drop(&mut self) {
        self.state.connections.release_connection(self.ip);
    }
}

/// Drop guard that releases a connection's resources when the handler
/// exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async lock.
struct ConnectionGuard<C: Codec> {
    connection_id: ConnectionId,
    state: Arc<ServerState<C>>,
}

impl<C: Codec> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        self.state.messages.forget(self.connection_id);

        let connection_id = self.connection_id;
        let orchestrator = Arc::clone(&self.state.orchestrator);
        tokio::spawn(async move {
            orchestrator
                .lock()
                .await
                .handle_disconnect(connection_id, Instant::now());
        });
    }
}

/// Handles a single connection from TCP accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    incoming: WebSocketHandshake,
    state: Arc<ServerState<C>>,
) -> Result<(), GambitError> {
    let ip = incoming.peer_addr().ip();

    // --- Step 1: Admission ---
    // The slot is claimed before the upgrade so sockets stuck mid-handshake
    // count against their address.
    if !state.shutdown.is_running() {
        let conn = incoming.upgrade().await?;
        return refuse(&conn, &state.codec, ErrorCode::ShuttingDown, "server is shutting down").await;
    }
    if !state.connections.track_connection(ip) {
        let conn = incoming.upgrade().await?;
        return refuse(
            &conn,
            &state.codec,
            ErrorCode::TooManyConnections,
            "too many connections from your address",
        )
        .await;
    }
    let _slot = AddressSlot {
        ip,
        state: Arc::clone(&state),
    };
    let conn = incoming.upgrade().await?;
    let connection_id = conn.id();
    tracing::debug!(conn_id = %connection_id, %ip, "handling new connection");

    // --- Step 2: Register ---
    let _guard = ConnectionGuard {
        connection_id,
        state: Arc::clone(&state),
    };
    let (tx, mut outbox) = mpsc::unbounded_channel();
    state.orchestrator.lock().await.register(connection_id, tx);

    // --- Step 3: Message loop ---
    let mut phase = state.shutdown.subscribe();
    let mut idle_deadline = tokio::time::Instant::now() + state.idle_timeout;
    let period = state.keepalive_interval.max(MIN_KEEPALIVE);
    let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = conn.recv() => match received {
                Ok(Some(Inbound::Message(data))) => {
                    idle_deadline = tokio::time::Instant::now() + state.idle_timeout;
                    handle_frame(&conn, &state, connection_id, &data).await?;
                }
                Ok(Some(Inbound::Heartbeat)) => {
                    idle_deadline = tokio::time::Instant::now() + state.idle_timeout;
                }
                Ok(None) => {
                    tracing::info!(conn_id = %connection_id, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    tracing::debug!(conn_id = %connection_id, error = %e, "recv error");
                    break;
                }
            },
            Some(message) = outbox.recv() => {
                send_message(&conn, &state.codec, &message).await?;
            }
            _ = keepalive.tick() => {
                if let Err(e) = conn.ping().await {
                    tracing::debug!(conn_id = %connection_id, error = %e, "ping failed");
                    break;
                }
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                tracing::info!(conn_id = %connection_id, "connection unresponsive, closing");
                break;
            }
            _ = wait_until_closing(&mut phase) => {
                // Flush whatever the drain produced before closing.
                while let Ok(message) = outbox.try_recv() {
                    send_message(&conn, &state.codec, &message).await?;
                }
                tracing::debug!(conn_id = %connection_id, "server closing connection");
                let _ = conn.close().await;
                break;
            }
        }
    }

    // _guard drops here → disconnect handling fires.
    Ok(())
}

/// Rate-limits, decodes, and dispatches one inbound frame.
async fn handle_frame<C: Codec>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<C>>,
    connection_id: ConnectionId,
    data: &[u8],
) -> Result<(), GambitError> {
    if !state.messages.check_ws_rate_limit(connection_id, Instant::now()) {
        tracing::debug!(conn_id = %connection_id, "rate limited");
        let reply = ServerMessage::error(ErrorCode::RateLimited, "too many messages, slow down");
        return send_message(conn, &state.codec, &reply).await;
    }

    let message = match decode_client_message(&state.codec, data) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(conn_id = %connection_id, error = %e, "failed to decode message");
            let reply = ServerMessage::error(e.code(), e.to_string());
            return send_message(conn, &state.codec, &reply).await;
        }
    };

    let kind = message.kind();
    let outcome = {
        let mut orch = state.orchestrator.lock().await;
        contain(kind, || orch.handle_message(connection_id, message, Instant::now()))
    };
    if outcome.is_err() {
        let reply = ServerMessage::error(ErrorCode::InternalError, "internal error, please retry");
        send_message(conn, &state.codec, &reply).await?;
    }
    Ok(())
}

/// Resolves once the server starts force-closing sockets.
async fn wait_until_closing(phase: &mut watch::Receiver<ShutdownPhase>) {
    // An error means the controller is gone, which only happens on exit.
    let _ = phase.wait_for(|p| *p >= ShutdownPhase::Closing).await;
}

/// Sends a message to the client.
async fn send_message(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    message: &ServerMessage,
) -> Result<(), GambitError> {
    let bytes = encode_server_message(codec, message)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Answers with an error and closes without registering the connection.
async fn refuse(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    code: ErrorCode,
    message: &str,
) -> Result<(), GambitError> {
    tracing::debug!(conn_id = %conn.id(), ?code, "connection refused");
    send_message(conn, codec, &ServerMessage::error(code, message)).await?;
    let _ = conn.close().await;
    Ok(())
}
