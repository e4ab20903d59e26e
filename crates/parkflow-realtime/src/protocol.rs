//! The connection protocol state machine.

use std::sync::Arc;

use tracing::{debug, info, warn};

use parkflow_core::AppError;
use parkflow_core::error::ErrorKind;
use parkflow_engine::AllocationEngine;
use parkflow_entity::message::{ErrorCode, WsMessage};
use parkflow_session::{ConnectionHandle, RegisterOutcome, SessionRegistry};

/// Connection lifecycle state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What the socket driver should do after an event was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Disposition {
    /// Keep reading from the connection.
    Continue,
    /// Close the connection.
    Close,
}

/// Result of the registration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum OpenOutcome {
    /// The session was registered; the connection is open.
    Accepted,
    /// Another connection already owns this user id. An error envelope
    /// was queued for *this* connection; the pre-existing one is left
    /// untouched.
    Rejected,
}

/// Protocol state machine for one duplex connection.
///
/// One instance per connection. The driver feeds it inbound text frames
/// strictly in order; every outbound envelope goes through the
/// connection handle's queue.
pub struct UserProtocol {
    user_id: String,
    handle: Arc<ConnectionHandle>,
    sessions: Arc<SessionRegistry>,
    engine: AllocationEngine,
    state: ConnectionState,
    torn_down: bool,
}

impl UserProtocol {
    /// Create the state machine for a freshly accepted connection.
    pub fn new(
        handle: Arc<ConnectionHandle>,
        sessions: Arc<SessionRegistry>,
        engine: AllocationEngine,
    ) -> Self {
        Self {
            user_id: handle.user_id.clone(),
            handle,
            sessions,
            engine,
            state: ConnectionState::Connecting,
            torn_down: false,
        }
    }

    /// The id of the connection this machine drives.
    pub fn connection_id(&self) -> parkflow_session::ConnectionId {
        self.handle.id
    }

    /// Register the session and move to the open state.
    ///
    /// When the user id already has a live session the new connection is
    /// told so and must be closed; the existing session stays intact.
    pub fn open(&mut self) -> OpenOutcome {
        debug_assert_eq!(self.state, ConnectionState::Connecting);

        match self.sessions.register(self.handle.clone()) {
            RegisterOutcome::Registered => {
                info!(user_id = %self.user_id, conn_id = %self.handle.id, "Connection open");
                self.state = ConnectionState::Open;
                OpenOutcome::Accepted
            }
            RegisterOutcome::AlreadyPresent => {
                warn!(user_id = %self.user_id, "Rejecting duplicate connection");
                self.handle.send(WsMessage::error(ErrorCode::AnotherConnectionOpen));
                self.state = ConnectionState::Closed;
                OpenOutcome::Rejected
            }
        }
    }

    /// Process one inbound text frame to completion.
    ///
    /// Every failure path queues exactly one error envelope or requests
    /// closure, never both for the same cause. Decode failures and
    /// business-rule rejections keep the connection open; session
    /// integrity failures close it. This method is the outermost
    /// per-message barrier: store and other unexpected failures are
    /// caught, reported as `DATABASE`/`INTERNAL`, and leave the
    /// connection open.
    pub async fn handle_text(&mut self, raw: &str) -> Disposition {
        if self.state != ConnectionState::Open {
            return Disposition::Close;
        }

        let message = match WsMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(user_id = %self.user_id, error = %e, "Undecodable frame");
                self.handle
                    .send(WsMessage::error_with_message(ErrorCode::InvalidMessage, e.to_string()));
                return Disposition::Continue;
            }
        };

        match self.dispatch(message).await {
            Ok(disposition) => {
                if disposition == Disposition::Close {
                    self.state = ConnectionState::Closed;
                }
                disposition
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Message handling failed");
                let code = match e.kind {
                    ErrorKind::Database => ErrorCode::Database,
                    _ => ErrorCode::Internal,
                };
                self.handle.send(WsMessage::error(code));
                Disposition::Continue
            }
        }
    }

    /// Route a decoded envelope to the engine or registry.
    async fn dispatch(&mut self, message: WsMessage) -> Result<Disposition, AppError> {
        match message {
            WsMessage::LocationUpdate(update) => {
                if self.sessions.update_location(&self.user_id, update.location) {
                    Ok(Disposition::Continue)
                } else {
                    Ok(self.corrupted_session("location update for unregistered session"))
                }
            }
            WsMessage::ParkingRequest(request) => {
                let offer = self
                    .engine
                    .request_allocation(&self.user_id, request.location, &request.preferences)
                    .await?;
                match offer {
                    Some(lot) => {
                        self.handle.send(WsMessage::ParkingAllocation(
                            parkflow_entity::message::ParkingAllocation { lot },
                        ));
                    }
                    None => {
                        self.handle
                            .send(WsMessage::error(ErrorCode::NoAvailableParkingLot));
                    }
                }
                Ok(Disposition::Continue)
            }
            WsMessage::ParkingAcceptance(acceptance) => {
                if self
                    .engine
                    .commit_allocation(&self.user_id, acceptance.id)
                    .await?
                {
                    self.handle.send(WsMessage::Confirmation);
                } else {
                    self.handle
                        .send(WsMessage::error(ErrorCode::AllocationCommitFail));
                }
                Ok(Disposition::Continue)
            }
            WsMessage::ParkingRejection(rejection) => {
                if self.sessions.record_rejection(&self.user_id, rejection.id) {
                    self.handle.send(WsMessage::Confirmation);
                    Ok(Disposition::Continue)
                } else {
                    Ok(self.corrupted_session("rejection for unregistered session"))
                }
            }
            WsMessage::ParkingCancellation(cancellation) => {
                info!(
                    user_id = %self.user_id,
                    lot_id = cancellation.id,
                    reason = cancellation.reason,
                    "Parking cancelled"
                );
                Ok(Disposition::Close)
            }
            // Server-outbound tags a client must not send.
            WsMessage::ParkingAllocation(_)
            | WsMessage::ParkingDeallocation
            | WsMessage::Error(_)
            | WsMessage::Confirmation => {
                self.handle.send(WsMessage::error(ErrorCode::NotImplemented));
                Ok(Disposition::Continue)
            }
        }
    }

    /// Report an unrecoverable session inconsistency and request closure.
    fn corrupted_session(&self, cause: &str) -> Disposition {
        warn!(user_id = %self.user_id, cause, "Corrupted session, closing connection");
        self.handle.send(WsMessage::error(ErrorCode::CorruptedSession));
        Disposition::Close
    }

    /// Tear the connection down.
    ///
    /// Idempotent; called on voluntary, remote, and error-triggered
    /// closes. Unregisters the session only while this connection still
    /// owns it, and then drops the user's allocation as a detached
    /// background action whose failure is logged, never propagated.
    pub fn close(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.state = ConnectionState::Closed;
        self.handle.mark_dead();

        if self.sessions.unregister(&self.user_id, self.handle.id) {
            let engine = self.engine.clone();
            let user_id = self.user_id.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.cancel_allocation(&user_id).await {
                    warn!(user_id, error = %e, "Failed to drop allocation on close");
                }
            });
        }
        info!(user_id = %self.user_id, conn_id = %self.handle.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::mpsc;

    use parkflow_core::config::engine::EngineConfig;
    use parkflow_core::result::AppResult;
    use parkflow_core::types::Location;
    use parkflow_database::ParkingStore;
    use parkflow_entity::message::ErrorInfo;
    use parkflow_entity::{Allocation, NearbyLot, NewParkingLot, ParkingLot};

    /// Scripted store: fixed responses, optional error injection, and a
    /// record of deallocated users.
    #[derive(Default)]
    struct StubStore {
        offer: Option<NearbyLot>,
        allocate_result: bool,
        fail: Option<ErrorKind>,
        deallocations: Mutex<Vec<String>>,
    }

    impl StubStore {
        fn check(&self) -> AppResult<()> {
            match self.fail {
                Some(kind) => Err(AppError::new(kind, "injected failure")),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl ParkingStore for StubStore {
        async fn insert_lot(&self, _lot: &NewParkingLot) -> AppResult<i32> {
            self.check()?;
            Ok(1)
        }

        async fn delete_lot(&self, _lot_id: i32) -> AppResult<bool> {
            self.check()?;
            Ok(true)
        }

        async fn update_availability(&self, _lot_id: i32, _available: i32) -> AppResult<bool> {
            self.check()?;
            Ok(true)
        }

        async fn update_price(&self, _lot_id: i32, _price: f64) -> AppResult<bool> {
            self.check()?;
            Ok(true)
        }

        async fn get_lot(&self, _lot_id: i32) -> AppResult<Option<ParkingLot>> {
            self.check()?;
            Ok(None)
        }

        async fn find_nearby(
            &self,
            _origin: Location,
            _max_distance_meters: f64,
            _exclude: &[i32],
        ) -> AppResult<Vec<NearbyLot>> {
            self.check()?;
            Ok(self.offer.clone().into_iter().collect())
        }

        async fn allocate(&self, _user_id: &str, _lot_id: i32) -> AppResult<bool> {
            self.check()?;
            Ok(self.allocate_result)
        }

        async fn deallocate(&self, user_id: &str) -> AppResult<()> {
            self.check()?;
            self.deallocations.lock().unwrap().push(user_id.to_string());
            Ok(())
        }

        async fn get_allocations(&self, _lot_id: i32) -> AppResult<Vec<Allocation>> {
            self.check()?;
            Ok(Vec::new())
        }
    }

    fn nearby_lot(id: i32) -> NearbyLot {
        NearbyLot {
            lot: ParkingLot {
                id,
                name: format!("lot-{id}"),
                capacity: 10,
                latitude: 0.0,
                longitude: 0.0,
                price: 2.0,
                num_available: 5,
                num_allocated: 1,
                created_at: Utc::now(),
            },
            distance_meters: 42.0,
        }
    }

    struct Fixture {
        store: Arc<StubStore>,
        sessions: Arc<SessionRegistry>,
    }

    impl Fixture {
        fn new(store: StubStore) -> Self {
            Self {
                store: Arc::new(store),
                sessions: Arc::new(SessionRegistry::new()),
            }
        }

        fn protocol(&self, user_id: &str) -> (UserProtocol, mpsc::Receiver<WsMessage>) {
            let (tx, rx) = mpsc::channel(8);
            let handle = Arc::new(ConnectionHandle::new(user_id, tx));
            let engine = AllocationEngine::new(
                &EngineConfig::default(),
                self.store.clone(),
                self.sessions.clone(),
            );
            (
                UserProtocol::new(handle, self.sessions.clone(), engine),
                rx,
            )
        }

        fn open_protocol(&self, user_id: &str) -> (UserProtocol, mpsc::Receiver<WsMessage>) {
            let (mut protocol, rx) = self.protocol(user_id);
            assert_eq!(protocol.open(), OpenOutcome::Accepted);
            (protocol, rx)
        }
    }

    fn assert_error(received: WsMessage, code: ErrorCode) {
        match received {
            WsMessage::Error(ErrorInfo { code: got, .. }) => assert_eq!(got, code as u32),
            other => panic!("expected error {code:?}, got {other:?}"),
        }
    }

    const LOCATION_FRAME: &str =
        r#"{"_type": 1, "location": {"latitude": 1.0, "longitude": 2.0}}"#;
    const REQUEST_FRAME: &str =
        r#"{"_type": 2, "location": {"latitude": 1.0, "longitude": 2.0}}"#;

    #[tokio::test]
    async fn duplicate_connection_is_rejected_and_first_survives() {
        let fixture = Fixture::new(StubStore::default());
        let (mut first, _rx1) = fixture.open_protocol("alice");

        let (mut second, mut rx2) = fixture.protocol("alice");
        assert_eq!(second.open(), OpenOutcome::Rejected);
        assert_error(rx2.try_recv().unwrap(), ErrorCode::AnotherConnectionOpen);

        // The first connection's session is untouched and still works.
        assert_eq!(first.handle_text(LOCATION_FRAME).await, Disposition::Continue);
        assert_eq!(
            fixture.sessions.lookup("alice").and_then(|s| s.location),
            Some(Location::new(1.0, 2.0))
        );

        // The duplicate's close must not tear the live session down.
        second.close();
        assert!(fixture.sessions.contains("alice"));
    }

    #[tokio::test]
    async fn malformed_frames_keep_the_connection_open() {
        let fixture = Fixture::new(StubStore::default());
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        for frame in [r#"{"_type": 9999}"#, "not json", r#"{"location": {}}"#, "[3]"] {
            assert_eq!(protocol.handle_text(frame).await, Disposition::Continue);
            assert_error(rx.try_recv().unwrap(), ErrorCode::InvalidMessage);
        }

        // A subsequent valid message is processed normally.
        assert_eq!(protocol.handle_text(LOCATION_FRAME).await, Disposition::Continue);
        assert!(rx.try_recv().is_err(), "location update has no reply");
    }

    #[tokio::test]
    async fn location_update_without_session_is_fatal() {
        let fixture = Fixture::new(StubStore::default());
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        // Simulate registry inconsistency.
        assert!(fixture.sessions.unregister("alice", protocol.connection_id()));

        assert_eq!(protocol.handle_text(LOCATION_FRAME).await, Disposition::Close);
        assert_error(rx.try_recv().unwrap(), ErrorCode::CorruptedSession);
    }

    #[tokio::test]
    async fn request_returns_nearest_offer() {
        let fixture = Fixture::new(StubStore {
            offer: Some(nearby_lot(7)),
            ..Default::default()
        });
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        assert_eq!(protocol.handle_text(REQUEST_FRAME).await, Disposition::Continue);
        match rx.try_recv().unwrap() {
            WsMessage::ParkingAllocation(allocation) => {
                assert_eq!(allocation.lot.id, 7);
                assert_eq!(allocation.lot.distance, 42.0);
            }
            other => panic!("expected allocation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_without_candidates_reports_no_lot() {
        let fixture = Fixture::new(StubStore::default());
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        assert_eq!(protocol.handle_text(REQUEST_FRAME).await, Disposition::Continue);
        assert_error(rx.try_recv().unwrap(), ErrorCode::NoAvailableParkingLot);
    }

    #[tokio::test]
    async fn acceptance_outcomes() {
        let confirmed = Fixture::new(StubStore {
            allocate_result: true,
            ..Default::default()
        });
        let (mut protocol, mut rx) = confirmed.open_protocol("alice");
        assert_eq!(
            protocol.handle_text(r#"{"_type": 4, "id": 7}"#).await,
            Disposition::Continue
        );
        assert_eq!(rx.try_recv().unwrap(), WsMessage::Confirmation);

        let refused = Fixture::new(StubStore::default());
        let (mut protocol, mut rx) = refused.open_protocol("bob");
        assert_eq!(
            protocol.handle_text(r#"{"_type": 4, "id": 7}"#).await,
            Disposition::Continue
        );
        assert_error(rx.try_recv().unwrap(), ErrorCode::AllocationCommitFail);
    }

    #[tokio::test]
    async fn rejection_confirms_and_is_recorded() {
        let fixture = Fixture::new(StubStore::default());
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        assert_eq!(
            protocol.handle_text(r#"{"_type": 5, "id": 3}"#).await,
            Disposition::Continue
        );
        assert_eq!(rx.try_recv().unwrap(), WsMessage::Confirmation);
        assert_eq!(
            fixture.sessions.lookup("alice").map(|s| s.rejections),
            Some(vec![3])
        );
    }

    #[tokio::test]
    async fn server_only_tags_are_not_implemented() {
        let fixture = Fixture::new(StubStore::default());
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        for frame in [
            r#"{"_type": 9}"#,
            r#"{"_type": 6}"#,
            r#"{"_type": 8, "error": {"code": 1, "message": "x"}}"#,
        ] {
            assert_eq!(protocol.handle_text(frame).await, Disposition::Continue);
            assert_error(rx.try_recv().unwrap(), ErrorCode::NotImplemented);
        }
    }

    #[tokio::test]
    async fn cancellation_closes_and_drops_allocation() {
        let fixture = Fixture::new(StubStore::default());
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        assert_eq!(
            protocol.handle_text(r#"{"_type": 7, "id": 2}"#).await,
            Disposition::Close
        );
        assert!(rx.try_recv().is_err(), "cancellation has no reply");

        protocol.close();
        assert!(!fixture.sessions.contains("alice"));

        // The allocation drop runs as a detached task.
        let mut dropped = false;
        for _ in 0..100 {
            if fixture.deallocated("alice") {
                dropped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(dropped, "cancel_allocation never ran");
    }

    #[tokio::test]
    async fn store_failures_are_reported_and_recoverable() {
        let fixture = Fixture::new(StubStore {
            fail: Some(ErrorKind::Database),
            ..Default::default()
        });
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        assert_eq!(protocol.handle_text(REQUEST_FRAME).await, Disposition::Continue);
        assert_error(rx.try_recv().unwrap(), ErrorCode::Database);

        // Registry-only operations still work on the same connection.
        assert_eq!(
            protocol.handle_text(r#"{"_type": 5, "id": 1}"#).await,
            Disposition::Continue
        );
        assert_eq!(rx.try_recv().unwrap(), WsMessage::Confirmation);
    }

    #[tokio::test]
    async fn unexpected_failures_are_reported_as_internal() {
        let fixture = Fixture::new(StubStore {
            fail: Some(ErrorKind::Internal),
            ..Default::default()
        });
        let (mut protocol, mut rx) = fixture.open_protocol("alice");

        assert_eq!(
            protocol.handle_text(r#"{"_type": 4, "id": 7}"#).await,
            Disposition::Continue
        );
        assert_error(rx.try_recv().unwrap(), ErrorCode::Internal);
    }

    impl Fixture {
        fn deallocated(&self, user_id: &str) -> bool {
            self.store
                .deallocations
                .lock()
                .unwrap()
                .iter()
                .any(|u| u == user_id)
        }
    }
}
