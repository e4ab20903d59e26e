//! Allocation engine operations.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use parkflow_core::config::engine::EngineConfig;
use parkflow_core::result::AppResult;
use parkflow_core::types::Location;
use parkflow_core::AppError;
use parkflow_database::ParkingStore;
use parkflow_entity::message::OfferedLot;
use parkflow_session::SessionRegistry;

/// Preference key holding the maximum search distance in meters.
const DISTANCE_PREFERENCE: &str = "distance";

/// The allocation engine.
///
/// Holds no state of its own; every operation reads the session registry
/// and the persistent store injected at construction.
#[derive(Clone)]
pub struct AllocationEngine {
    store: Arc<dyn ParkingStore>,
    sessions: Arc<SessionRegistry>,
    default_radius_meters: f64,
}

impl std::fmt::Debug for AllocationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationEngine")
            .field("default_radius_meters", &self.default_radius_meters)
            .finish()
    }
}

impl AllocationEngine {
    /// Create a new engine over the given store and registry.
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn ParkingStore>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            sessions,
            default_radius_meters: config.default_search_radius_meters,
        }
    }

    /// Find the nearest eligible lot for a request.
    ///
    /// Eligible means: within the requested distance (or the configured
    /// default when the `distance` preference is absent or non-numeric),
    /// not previously rejected by this user, and holding a free slot.
    /// Always takes the nearest candidate; there is no load balancing
    /// across near-ties.
    pub async fn request_allocation(
        &self,
        user_id: &str,
        location: Location,
        preferences: &HashMap<String, Value>,
    ) -> AppResult<Option<OfferedLot>> {
        let rejections = self
            .sessions
            .lookup(user_id)
            .map(|session| session.rejections)
            .ok_or_else(|| AppError::session(format!("no live session for '{user_id}'")))?;

        let max_distance = preferences
            .get(DISTANCE_PREFERENCE)
            .and_then(Value::as_f64)
            .unwrap_or(self.default_radius_meters);

        let lots = self
            .store
            .find_nearby(location, max_distance, &rejections)
            .await?;

        match lots.first() {
            Some(nearest) => {
                debug!(
                    user_id,
                    lot_id = nearest.lot.id,
                    distance = nearest.distance_meters,
                    "Offering nearest lot"
                );
                Ok(Some(OfferedLot::from(nearest)))
            }
            None => {
                debug!(user_id, max_distance, "No eligible lot found");
                Ok(None)
            }
        }
    }

    /// Commit an allocation for a previously offered lot.
    ///
    /// The store performs the conditional increment and uniqueness insert
    /// as one atomic unit; `false` means the lot filled up in the
    /// meantime or the user already holds an allocation, with no state
    /// mutated. Does not touch the session registry.
    pub async fn commit_allocation(&self, user_id: &str, lot_id: i32) -> AppResult<bool> {
        let committed = self.store.allocate(user_id, lot_id).await?;
        if !committed {
            warn!(user_id, lot_id, "Failed to commit allocation");
        }
        Ok(committed)
    }

    /// Drop the user's allocation if present. Idempotent; used on
    /// cancellation and on disconnect.
    pub async fn cancel_allocation(&self, user_id: &str) -> AppResult<()> {
        self.store.deallocate(user_id).await?;
        info!(user_id, "Removed allocation");
        Ok(())
    }

    /// Re-establish the committed ≤ available invariant for a lot after
    /// its availability dropped.
    ///
    /// Evicts the `committed - available` allocated users farthest from
    /// the lot (ties keep fetch order), notifying each through the
    /// session registry. A user with no recorded location is treated as
    /// farthest and evicted first. Evictions are independent: one
    /// failing is logged and does not stop the rest.
    pub async fn rebalance(&self, lot_id: i32) -> AppResult<()> {
        let Some(lot) = self.store.get_lot(lot_id).await? else {
            debug!(lot_id, "Rebalance skipped, lot no longer exists");
            return Ok(());
        };

        let overflow = lot.overflow();
        if overflow <= 0 {
            return Ok(());
        }
        info!(lot_id, overflow, "Rebalancing over-committed lot");

        let lot_location = lot.location();
        let mut allocations: Vec<(String, Option<f64>)> = self
            .store
            .get_allocations(lot_id)
            .await?
            .into_iter()
            .map(|allocation| {
                let distance = self
                    .sessions
                    .lookup(&allocation.user_id)
                    .and_then(|session| session.location)
                    .map(|loc| loc.distance_meters(&lot_location));
                (allocation.user_id, distance)
            })
            .collect();

        // Farthest first; unknown distance sorts ahead of every known
        // one. The sort is stable, so equal keys keep fetch order.
        allocations.sort_by(|(_, a), (_, b)| match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => b.partial_cmp(a).unwrap_or(Ordering::Equal),
        });

        let evictions = allocations
            .into_iter()
            .take(overflow as usize)
            .map(|(user_id, distance)| async move {
                debug!(lot_id, user_id, ?distance, "Evicting allocation");
                match self.store.deallocate(&user_id).await {
                    Ok(()) => self.sessions.notify_deallocation(&user_id),
                    Err(e) => warn!(lot_id, user_id, error = %e, "Failed to evict allocation"),
                }
            });
        join_all(evictions).await;

        Ok(())
    }
}
