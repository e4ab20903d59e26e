//! Allocation entity model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The binding of one user to one parking lot.
///
/// A user holds at most one live allocation; the `allocations` table
/// enforces this with a primary key on `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Allocation {
    /// The user holding the allocation.
    pub user_id: String,
    /// The allocated lot.
    pub lot_id: i32,
    /// Monotonic insertion sequence; gives fetches a stable order.
    pub seq: i64,
}
