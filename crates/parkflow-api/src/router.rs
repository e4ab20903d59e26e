//! Route definitions for the ParkFlow HTTP API.

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(space_routes())
        .merge(health_routes())
        .route("/ws/{user_id}", get(handlers::ws::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Sensor/operator lot management endpoints.
fn space_routes() -> Router<AppState> {
    Router::new()
        .route("/spaces", post(handlers::lot::create_lot))
        .route("/spaces/{id}", delete(handlers::lot::delete_lot))
        .route(
            "/spaces/{id}/available",
            post(handlers::lot::update_availability),
        )
        .route("/spaces/{id}/price", post(handlers::lot::update_price))
}

/// Liveness endpoints.
fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(handlers::health::health))
        .route("/api/health/detailed", get(handlers::health::health_detailed))
}
