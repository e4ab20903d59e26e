//! Integration tests for the user WebSocket protocol over real sockets.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parkflow_entity::message::{ErrorCode, ErrorInfo, WsMessage};

use crate::helpers::{TestApp, create_lot, db_lock, set_availability};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(app: &TestApp, user_id: &str) -> WsClient {
    let (client, _) = connect_async(app.ws_url(user_id))
        .await
        .expect("WebSocket connect");
    client
}

async fn send_frame(client: &mut WsClient, frame: serde_json::Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Receive the next text frame as a decoded envelope.
async fn recv_envelope(client: &mut WsClient) -> WsMessage {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("receive error");
        if let Message::Text(text) = message {
            return WsMessage::decode(text.as_str()).expect("decodable frame");
        }
    }
}

fn assert_error_code(envelope: WsMessage, code: ErrorCode) {
    match envelope {
        WsMessage::Error(ErrorInfo { code: got, .. }) => assert_eq!(got, code as u32),
        other => panic!("expected error {code:?}, got {other:?}"),
    }
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

fn location_frame(latitude: f64, longitude: f64) -> serde_json::Value {
    json!({ "_type": 1, "location": { "latitude": latitude, "longitude": longitude } })
}

#[tokio::test]
async fn malformed_envelope_leaves_connection_usable() {
    let app = TestApp::spawn().await;
    let mut client = connect(&app, "alice").await;

    send_frame(&mut client, json!({ "_type": 9999 })).await;
    assert_error_code(recv_envelope(&mut client).await, ErrorCode::InvalidMessage);

    // A valid update still lands in the registry afterwards.
    send_frame(&mut client, location_frame(48.8566, 2.3522)).await;
    eventually("location recorded", || {
        matches!(app.sessions.lookup("alice").and_then(|s| s.location), Some(_))
    })
    .await;
}

#[tokio::test]
async fn duplicate_connection_is_turned_away() {
    let app = TestApp::spawn().await;

    let mut first = connect(&app, "bob").await;
    eventually("first session registered", || app.sessions.contains("bob")).await;

    let mut second = connect(&app, "bob").await;
    assert_error_code(
        recv_envelope(&mut second).await,
        ErrorCode::AnotherConnectionOpen,
    );
    // The server closes the duplicate after the error.
    loop {
        match second.next().await {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }

    // The original session survived and still accepts updates.
    send_frame(&mut first, location_frame(1.5, 2.5)).await;
    eventually("first session still live", || {
        matches!(
            app.sessions.lookup("bob").and_then(|s| s.location),
            Some(loc) if loc.latitude == 1.5
        )
    })
    .await;
}

#[tokio::test]
async fn disconnect_unregisters_the_session() {
    let app = TestApp::spawn().await;

    let mut client = connect(&app, "carol").await;
    eventually("session registered", || app.sessions.contains("carol")).await;

    client.close(None).await.expect("close");
    eventually("session removed", || !app.sessions.contains("carol")).await;
}

#[tokio::test]
async fn allocation_flow_end_to_end() {
    let _guard = db_lock().await;
    let app = TestApp::spawn().await;
    if !app.database_ready().await {
        return;
    }

    // Operator registers a lot next to the user.
    let (status, body) = create_lot(&app, "Central", 2, 2.0, 51.5074, -0.1278).await;
    assert_eq!(status, http::StatusCode::CREATED);
    let lot_id = body["id"].as_i64().expect("lot id") as i32;

    let mut client = connect(&app, "dave").await;
    send_frame(&mut client, location_frame(51.5074, -0.1278)).await;

    // Request parking; the only lot is at distance ~0.
    send_frame(
        &mut client,
        json!({
            "_type": 2,
            "location": { "latitude": 51.5074, "longitude": -0.1278 },
            "preferences": { "distance": 1000.0 },
        }),
    )
    .await;
    let offer = match recv_envelope(&mut client).await {
        WsMessage::ParkingAllocation(allocation) => allocation.lot,
        other => panic!("expected an offer, got {other:?}"),
    };
    assert_eq!(offer.id, lot_id);

    // Accept it.
    send_frame(&mut client, json!({ "_type": 4, "id": offer.id })).await;
    assert_eq!(recv_envelope(&mut client).await, WsMessage::Confirmation);

    // The sensor reports the lot has no free spaces left; the committed
    // allocation overflows and the user is evicted with a notice.
    let (status, _) = set_availability(&app, lot_id, 0).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(
        recv_envelope(&mut client).await,
        WsMessage::ParkingDeallocation
    );
}
