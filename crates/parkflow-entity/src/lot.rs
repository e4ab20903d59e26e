//! Parking lot entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use parkflow_core::AppError;
use parkflow_core::types::Location;

/// A parking lot as stored in the `parking_lots` table.
///
/// `num_available` is pushed by sensors/operators; `num_allocated` is the
/// committed allocation count. The desired invariant is
/// `0 <= num_allocated <= num_available <= capacity`, but `num_allocated`
/// may transiently exceed `num_available` after an availability drop,
/// which is what triggers rebalancing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParkingLot {
    /// Unique lot identifier (assigned by the store on creation).
    pub id: i32,
    /// Display name.
    pub name: String,
    /// Total number of physical spaces.
    pub capacity: i32,
    /// Latitude in signed degrees.
    pub latitude: f64,
    /// Longitude in signed degrees.
    pub longitude: f64,
    /// Price per hour.
    pub price: f64,
    /// Currently available spaces as last reported.
    pub num_available: i32,
    /// Committed allocation count.
    pub num_allocated: i32,
    /// When the lot was registered.
    pub created_at: DateTime<Utc>,
}

impl ParkingLot {
    /// Geographic position of the lot.
    pub fn location(&self) -> Location {
        Location::new(self.latitude, self.longitude)
    }

    /// By how many allocations the lot is over-committed.
    ///
    /// Positive when an availability drop has left more committed
    /// allocations than available spaces.
    pub fn overflow(&self) -> i32 {
        self.num_allocated - self.num_available
    }

    /// Whether the lot can accept another allocation.
    pub fn has_free_slot(&self) -> bool {
        self.num_allocated < self.num_available
    }
}

/// Data required to create a new parking lot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewParkingLot {
    /// Display name.
    pub name: String,
    /// Total number of physical spaces.
    pub capacity: i32,
    /// Geographic position.
    pub location: Location,
    /// Price per hour.
    pub price: f64,
}

impl NewParkingLot {
    /// Validating constructor.
    ///
    /// Rejects empty names, non-positive capacity, negative or non-finite
    /// prices, and out-of-range coordinates.
    pub fn new(
        name: impl Into<String>,
        capacity: i32,
        location: Location,
        price: f64,
    ) -> Result<Self, AppError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        if capacity < 1 {
            return Err(AppError::validation("capacity must be positive"));
        }
        if !price.is_finite() || price < 0.0 {
            return Err(AppError::validation("price must be non-negative"));
        }
        if !location.in_range() {
            return Err(AppError::validation("location out of range"));
        }
        Ok(Self {
            name,
            capacity,
            location,
            price,
        })
    }
}

/// A lot returned by a nearby search, carrying its computed distance
/// from the request location.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NearbyLot {
    /// The matched lot.
    #[sqlx(flatten)]
    pub lot: ParkingLot,
    /// Great-circle distance from the request location, in meters.
    pub distance_meters: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lot_validates_fields() {
        let loc = Location::new(51.5, -0.12);
        assert!(NewParkingLot::new("Central", 10, loc, 2.5).is_ok());
        assert!(NewParkingLot::new("", 10, loc, 2.5).is_err());
        assert!(NewParkingLot::new("Central", 0, loc, 2.5).is_err());
        assert!(NewParkingLot::new("Central", 10, loc, -1.0).is_err());
        assert!(NewParkingLot::new("Central", 10, Location::new(95.0, 0.0), 2.5).is_err());
    }

    #[test]
    fn overflow_reflects_committed_minus_available() {
        let lot = ParkingLot {
            id: 1,
            name: "Central".into(),
            capacity: 10,
            latitude: 0.0,
            longitude: 0.0,
            price: 2.0,
            num_available: 1,
            num_allocated: 3,
            created_at: Utc::now(),
        };
        assert_eq!(lot.overflow(), 2);
        assert!(!lot.has_free_slot());
    }
}
