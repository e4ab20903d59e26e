//! WebSocket upgrade handler and socket driver.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parkflow_realtime::{Disposition, OpenOutcome, UserProtocol};
use parkflow_session::ConnectionHandle;

use crate::state::AppState;

/// GET /ws/{user_id} — WebSocket upgrade.
///
/// The path parameter is the connection's identity; one connection per
/// user id is permitted at a time.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| drive_connection(state, user_id, socket))
}

/// Drives one established WebSocket connection through the protocol
/// state machine.
///
/// Inbound frames are processed strictly one at a time, so a connection
/// never has two messages in flight. Outbound envelopes flow through the
/// connection handle's queue and a forwarder task, which also serializes
/// pushes (deallocation notices) arriving from other tasks.
async fn drive_connection(state: AppState, user_id: String, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut outbound_rx) = mpsc::channel(state.config.realtime.channel_buffer_size);
    let handle = Arc::new(ConnectionHandle::new(user_id, tx));
    let mut protocol = UserProtocol::new(handle, state.sessions.clone(), state.engine.clone());

    let outbound_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let frame = parkflow_entity::WsMessage::encode(&envelope);
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    if protocol.open() == OpenOutcome::Accepted {
        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if protocol.handle_text(text.as_str()).await == Disposition::Close {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Pings are answered by axum itself.
                }
                Ok(Message::Binary(_)) => {
                    debug!("Ignoring binary frame");
                }
                Err(e) => {
                    warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    }

    protocol.close();
    // Dropping the protocol releases the last queue sender, letting the
    // forwarder flush whatever is queued (including the rejection error
    // for duplicate connections) and close the socket.
    drop(protocol);
    let _ = outbound_task.await;
}
