//! Integration tests for the sensor/operator REST interface.

use http::StatusCode;
use serde_json::{Value, json};

use crate::helpers::{TestApp, create_lot, db_lock, request, set_availability};

fn lot_body(name: &str, capacity: i32, price: f64) -> Value {
    json!({
        "name": name,
        "capacity": capacity,
        "location": { "latitude": 51.5074, "longitude": -0.1278 },
        "price": price,
    })
}

#[tokio::test]
async fn health_check() {
    let app = TestApp::spawn().await;

    let (status, body) = request(&app.router, "GET", "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn invalid_lot_payloads_are_rejected() {
    let app = TestApp::spawn().await;

    for body in [
        lot_body("", 10, 2.0),
        lot_body("Central", 0, 2.0),
        lot_body("Central", 10, -1.0),
        json!({
            "name": "Central",
            "capacity": 10,
            "location": { "latitude": 95.0, "longitude": 0.0 },
            "price": 2.0,
        }),
    ] {
        let (status, response) = request(&app.router, "POST", "/spaces", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "VALIDATION");
    }
}

#[tokio::test]
async fn negative_availability_is_rejected() {
    let app = TestApp::spawn().await;

    let (status, _) = request(
        &app.router,
        "POST",
        "/spaces/1/available",
        Some(json!({ "available": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lot_lifecycle_round_trip() {
    let _guard = db_lock().await;
    let app = TestApp::spawn().await;
    if !app.database_ready().await {
        return;
    }

    let (status, body) = create_lot(&app, "Central", 10, 2.0, 51.5074, -0.1278).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_i64().expect("lot id") as i32;

    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/spaces/{id}/price"),
        Some(json!({ "price": 3.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = set_availability(&app, id, 4).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(&app.router, "DELETE", &format!("/spaces/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = request(&app.router, "DELETE", &format!("/spaces/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn updates_on_unknown_lot_are_not_found() {
    let _guard = db_lock().await;
    let app = TestApp::spawn().await;
    if !app.database_ready().await {
        return;
    }

    let (status, _) = request(
        &app.router,
        "POST",
        "/spaces/424242/price",
        Some(json!({ "price": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
