//! The persistent store contract consumed by the allocation engine.

use async_trait::async_trait;

use parkflow_core::result::AppResult;
use parkflow_core::types::Location;
use parkflow_entity::{Allocation, NearbyLot, NewParkingLot, ParkingLot};

/// Storage operations over parking lots and allocations.
///
/// The engine and the REST surface depend on this trait rather than on
/// the sqlx implementation so tests can substitute an in-memory fake.
/// Mutual exclusion for a lot's committed/available counters lives behind
/// [`allocate`](ParkingStore::allocate): the conditional increment and the
/// uniqueness insert are one atomic unit, which is what keeps two
/// concurrent commits from both taking the last slot.
#[async_trait]
pub trait ParkingStore: Send + Sync {
    /// Insert a lot and return its assigned id. The lot starts with
    /// `num_available = capacity` and no allocations.
    async fn insert_lot(&self, lot: &NewParkingLot) -> AppResult<i32>;

    /// Delete a lot. Returns `false` if the id is unknown.
    async fn delete_lot(&self, lot_id: i32) -> AppResult<bool>;

    /// Overwrite a lot's available-space count. Returns `false` if the id
    /// is unknown.
    async fn update_availability(&self, lot_id: i32, available: i32) -> AppResult<bool>;

    /// Overwrite a lot's price. Returns `false` if the id is unknown.
    async fn update_price(&self, lot_id: i32, price: f64) -> AppResult<bool>;

    /// Fetch a single lot.
    async fn get_lot(&self, lot_id: i32) -> AppResult<Option<ParkingLot>>;

    /// Lots within `max_distance_meters` of `origin`, excluding the given
    /// ids, restricted to lots with a free slot, ordered by ascending
    /// great-circle distance.
    async fn find_nearby(
        &self,
        origin: Location,
        max_distance_meters: f64,
        exclude: &[i32],
    ) -> AppResult<Vec<NearbyLot>>;

    /// Atomically commit an allocation: increment the lot's committed
    /// count only while `num_allocated < num_available`, then insert the
    /// allocation row. Returns `false` (with no state mutated) when the
    /// lot is full, unknown, or the user already holds an allocation.
    async fn allocate(&self, user_id: &str, lot_id: i32) -> AppResult<bool>;

    /// Delete the user's allocation if present, decrementing the owning
    /// lot's committed count. Idempotent.
    async fn deallocate(&self, user_id: &str) -> AppResult<()>;

    /// All allocation rows for a lot, in stable insertion order.
    async fn get_allocations(&self, lot_id: i32) -> AppResult<Vec<Allocation>>;
}
