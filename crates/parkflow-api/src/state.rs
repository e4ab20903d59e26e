//! Application state shared across all handlers.

use std::sync::Arc;

use parkflow_core::config::AppConfig;
use parkflow_database::{DatabasePool, ParkingStore};
use parkflow_engine::AllocationEngine;
use parkflow_session::SessionRegistry;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`. All fields are
/// `Arc`-wrapped (or internally Arc'd) for cheap cloning across tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Database pool (health checks).
    pub db: DatabasePool,
    /// Persistent store.
    pub store: Arc<dyn ParkingStore>,
    /// Live session registry.
    pub sessions: Arc<SessionRegistry>,
    /// Allocation engine.
    pub engine: AllocationEngine,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}
