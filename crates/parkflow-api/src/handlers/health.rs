//! Health check endpoints.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

/// GET /api/health — liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/health/detailed — includes a database round trip.
pub async fn health_detailed(State(state): State<AppState>) -> Json<Value> {
    let database = match state.db.health_check().await {
        Ok(true) => "ok",
        _ => "unavailable",
    };

    Json(json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "database": database,
        "sessions": state.sessions.len(),
    }))
}
