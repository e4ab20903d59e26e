//! Request/response bodies for the sensor/operator REST interface.

use serde::{Deserialize, Serialize};

use parkflow_core::AppError;
use parkflow_core::types::Location;
use parkflow_entity::NewParkingLot;

/// Body of `POST /spaces`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLotRequest {
    /// Display name.
    pub name: String,
    /// Total capacity.
    pub capacity: i32,
    /// Lot position.
    pub location: Location,
    /// Price per hour.
    pub price: f64,
}

impl CreateLotRequest {
    /// Convert into the validated domain payload.
    pub fn into_new_lot(self) -> Result<NewParkingLot, AppError> {
        NewParkingLot::new(self.name, self.capacity, self.location, self.price)
    }
}

/// Response of `POST /spaces`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLotResponse {
    /// Assigned lot id.
    pub id: i32,
}

/// Body of `POST /spaces/{id}/available`.
#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityUpdate {
    /// New available-space count.
    pub available: i32,
}

impl AvailabilityUpdate {
    /// Validate the count.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.available < 0 {
            return Err(AppError::validation("available must be non-negative"));
        }
        Ok(())
    }
}

/// Body of `POST /spaces/{id}/price`.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceUpdate {
    /// New price per hour.
    pub price: f64,
}

impl PriceUpdate {
    /// Validate the price.
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(AppError::validation("price must be non-negative"));
        }
        Ok(())
    }
}
