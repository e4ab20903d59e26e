//! Session registry — tracks live user sessions indexed by user id.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use parkflow_core::types::Location;
use parkflow_entity::WsMessage;

use crate::handle::{ConnectionHandle, ConnectionId};

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The session was created.
    Registered,
    /// Another live session already owns this user id; nothing was
    /// mutated and the caller must not overwrite it.
    AlreadyPresent,
}

/// State kept per connected user.
#[derive(Debug)]
struct UserSession {
    /// Handle of the owning connection.
    handle: Arc<ConnectionHandle>,
    /// Last reported position; absent until the first location update.
    location: Option<Location>,
    /// Lot ids the user has declined, in rejection order.
    rejections: Vec<i32>,
}

/// Owned copy of a session's state, as returned by
/// [`SessionRegistry::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Id of the owning connection.
    pub connection_id: ConnectionId,
    /// Last reported position; `None` until the first location update.
    pub location: Option<Location>,
    /// Lot ids the user has declined, in rejection order.
    pub rejections: Vec<i32>,
}

/// Directory of live sessions.
///
/// All mutation goes through per-user entries, so each operation is
/// atomic with respect to its user id even under the parallel tokio
/// runtime. Compound state (location + rejections) lives inside the
/// entry and is updated under the entry lock.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, UserSession>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for the handle's user id.
    ///
    /// Refuses (without mutating) when the user already has a live
    /// session.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> RegisterOutcome {
        match self.sessions.entry(handle.user_id.clone()) {
            Entry::Occupied(_) => RegisterOutcome::AlreadyPresent,
            Entry::Vacant(entry) => {
                info!(user_id = %handle.user_id, conn_id = %handle.id, "Session registered");
                entry.insert(UserSession {
                    handle,
                    location: None,
                    rejections: Vec::new(),
                });
                RegisterOutcome::Registered
            }
        }
    }

    /// Remove the user's session, but only if it is still owned by the
    /// given connection.
    ///
    /// A close can suspend on I/O and resume after a new connection for
    /// the same user id has registered; the id comparison keeps that
    /// stale close from removing the newer session. Returns whether a
    /// session was removed.
    pub fn unregister(&self, user_id: &str, conn_id: ConnectionId) -> bool {
        let removed = self
            .sessions
            .remove_if(user_id, |_, session| session.handle.id == conn_id)
            .is_some();
        if removed {
            info!(user_id, %conn_id, "Session unregistered");
        } else {
            debug!(user_id, %conn_id, "Stale unregister ignored");
        }
        removed
    }

    /// Whether the user currently has a live session.
    pub fn contains(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    /// An owned snapshot of the user's session, or `None` when the user
    /// has no live session.
    pub fn lookup(&self, user_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(user_id).map(|session| SessionSnapshot {
            connection_id: session.handle.id,
            location: session.location,
            rejections: session.rejections.clone(),
        })
    }

    /// Record a location update. Returns `false` when the user has no
    /// live session.
    pub fn update_location(&self, user_id: &str, location: Location) -> bool {
        match self.sessions.get_mut(user_id) {
            Some(mut session) => {
                session.location = Some(location);
                true
            }
            None => false,
        }
    }

    /// Record a declined lot. Returns `false` when the user has no live
    /// session.
    pub fn record_rejection(&self, user_id: &str, lot_id: i32) -> bool {
        match self.sessions.get_mut(user_id) {
            Some(mut session) => {
                session.rejections.push(lot_id);
                true
            }
            None => false,
        }
    }

    /// Push a deallocation envelope to the user's connection.
    ///
    /// A no-op when the user has no live session (already disconnected);
    /// a dropped send is logged by the handle and never propagates.
    pub fn notify_deallocation(&self, user_id: &str) {
        if let Some(session) = self.sessions.get(user_id) {
            if !session.handle.send(WsMessage::ParkingDeallocation) {
                debug!(user_id, "Deallocation notice dropped");
            }
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
