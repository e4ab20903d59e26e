//! Sensor/operator lot management handlers.
//!
//! These endpoints are the external half of the system: sensors push
//! availability, operators create and price lots. An availability drop
//! can leave a lot over-committed, so that handler kicks off a
//! rebalance after the write lands.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::{info, warn};

use parkflow_core::AppError;

use crate::dto::{AvailabilityUpdate, CreateLotRequest, CreateLotResponse, PriceUpdate};
use crate::error::ApiError;
use crate::state::AppState;

/// POST /spaces — register a new lot.
pub async fn create_lot(
    State(state): State<AppState>,
    Json(body): Json<CreateLotRequest>,
) -> Result<(StatusCode, Json<CreateLotResponse>), ApiError> {
    let lot = body.into_new_lot()?;
    let id = state.store.insert_lot(&lot).await?;
    info!(lot_id = id, name = %lot.name, "Parking lot created");
    Ok((StatusCode::CREATED, Json(CreateLotResponse { id })))
}

/// DELETE /spaces/{id} — remove a lot.
pub async fn delete_lot(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_lot(id).await? {
        return Err(AppError::not_found(format!("Unknown lot {id}")).into());
    }
    info!(lot_id = id, "Parking lot deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /spaces/{id}/available — push an availability reading.
///
/// The rebalance runs detached: the sensor's request does not wait for
/// evictions, and an eviction failure never surfaces here.
pub async fn update_availability(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<AvailabilityUpdate>,
) -> Result<StatusCode, ApiError> {
    body.validate()?;
    if !state.store.update_availability(id, body.available).await? {
        return Err(AppError::not_found(format!("Unknown lot {id}")).into());
    }

    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.rebalance(id).await {
            warn!(lot_id = id, error = %e, "Rebalance failed");
        }
    });

    Ok(StatusCode::OK)
}

/// POST /spaces/{id}/price — update the price.
pub async fn update_price(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<PriceUpdate>,
) -> Result<StatusCode, ApiError> {
    body.validate()?;
    if !state.store.update_price(id, body.price).await? {
        return Err(AppError::not_found(format!("Unknown lot {id}")).into());
    }
    Ok(StatusCode::OK)
}
