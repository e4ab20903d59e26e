//! Geographic position and great-circle distance.

use serde::{Deserialize, Serialize};

/// Mean earth radius in meters, as used by the haversine formula.
///
/// The SQL distance expression in `parkflow-database` must use the same
/// constant so that store-side ordering and engine-side distances agree.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A geographic position in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees, south negative.
    pub latitude: f64,
    /// Longitude in degrees, west negative.
    pub longitude: f64,
}

impl Location {
    /// Create a location without range validation.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and within their valid ranges.
    pub fn in_range(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in meters (haversine).
    pub fn distance_meters(&self, other: &Location) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_METERS * c
    }
}
