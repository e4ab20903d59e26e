//! Individual WebSocket connection handle.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use uuid::Uuid;

use parkflow_entity::WsMessage;

/// Unique connection identifier.
///
/// Distinguishes physical connections for the same user id: the
/// registry's unregister path compares connection ids so a stale close
/// cannot remove a newer session.
pub type ConnectionId = Uuid;

/// A handle to a single WebSocket connection.
///
/// Holds the sender half of the connection's outbound queue; the socket
/// driver owns the receiver and forwards envelopes onto the wire.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// User who owns this connection.
    pub user_id: String,
    /// Sender for outbound envelopes.
    sender: mpsc::Sender<WsMessage>,
    /// Whether the connection is still alive.
    alive: AtomicBool,
}

impl ConnectionHandle {
    /// Create a new connection handle.
    pub fn new(user_id: impl Into<String>, sender: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            sender,
            alive: AtomicBool::new(true),
        }
    }

    /// Queue an outbound envelope for this connection.
    ///
    /// Returns `false` when the message was dropped (dead connection,
    /// full buffer, or closed receiver). Never blocks.
    pub fn send(&self, msg: WsMessage) -> bool {
        if !self.is_alive() {
            return false;
        }
        match self.sender.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(conn_id = %self.id, "Send buffer full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mark_dead();
                false
            }
        }
    }

    /// Check if the connection is alive.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark the connection as dead.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}
