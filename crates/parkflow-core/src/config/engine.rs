//! Allocation engine configuration.

use serde::{Deserialize, Serialize};

/// Allocation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Search radius in meters used when a request carries no
    /// `distance` preference.
    #[serde(default = "default_search_radius")]
    pub default_search_radius_meters: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_search_radius_meters: default_search_radius(),
        }
    }
}

fn default_search_radius() -> f64 {
    500.0
}
