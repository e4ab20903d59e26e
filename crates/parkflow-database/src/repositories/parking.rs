//! sqlx implementation of the [`ParkingStore`] contract.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use parkflow_core::error::{AppError, ErrorKind};
use parkflow_core::result::AppResult;
use parkflow_core::types::Location;
use parkflow_entity::{Allocation, NearbyLot, NewParkingLot, ParkingLot};

use crate::store::ParkingStore;

/// Haversine distance in SQL, in meters. Uses the same earth radius as
/// `Location::distance_meters` so ordering agrees between SQL and Rust.
const DISTANCE_EXPR: &str = "2.0 * 6371000.0 * asin(sqrt( \
     pow(sin(radians(latitude - $1) / 2.0), 2) \
     + cos(radians($1)) * cos(radians(latitude)) \
     * pow(sin(radians(longitude - $2) / 2.0), 2)))";

/// PostgreSQL-backed parking store.
#[derive(Debug, Clone)]
pub struct PgParkingStore {
    pool: PgPool,
}

impl PgParkingStore {
    /// Create a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParkingStore for PgParkingStore {
    async fn insert_lot(&self, lot: &NewParkingLot) -> AppResult<i32> {
        sqlx::query_scalar::<_, i32>(
            "INSERT INTO parking_lots \
             (name, capacity, latitude, longitude, price, num_available, num_allocated) \
             VALUES ($1, $2, $3, $4, $5, $2, 0) RETURNING id",
        )
        .bind(&lot.name)
        .bind(lot.capacity)
        .bind(lot.location.latitude)
        .bind(lot.location.longitude)
        .bind(lot.price)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to insert lot", e))
    }

    async fn delete_lot(&self, lot_id: i32) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM parking_lots WHERE id = $1")
            .bind(lot_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to delete lot", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_availability(&self, lot_id: i32, available: i32) -> AppResult<bool> {
        let result = sqlx::query("UPDATE parking_lots SET num_available = $2 WHERE id = $1")
            .bind(lot_id)
            .bind(available)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to update availability", e)
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_price(&self, lot_id: i32, price: f64) -> AppResult<bool> {
        let result = sqlx::query("UPDATE parking_lots SET price = $2 WHERE id = $1")
            .bind(lot_id)
            .bind(price)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to update price", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_lot(&self, lot_id: i32) -> AppResult<Option<ParkingLot>> {
        sqlx::query_as::<_, ParkingLot>("SELECT * FROM parking_lots WHERE id = $1")
            .bind(lot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to fetch lot", e))
    }

    async fn find_nearby(
        &self,
        origin: Location,
        max_distance_meters: f64,
        exclude: &[i32],
    ) -> AppResult<Vec<NearbyLot>> {
        let query = format!(
            "SELECT * FROM ( \
               SELECT *, {DISTANCE_EXPR} AS distance_meters \
               FROM parking_lots \
               WHERE num_available > num_allocated \
             ) candidates \
             WHERE distance_meters <= $3 AND id <> ALL($4) \
             ORDER BY distance_meters ASC"
        );

        sqlx::query_as::<_, NearbyLot>(&query)
            .bind(origin.latitude)
            .bind(origin.longitude)
            .bind(max_distance_meters)
            .bind(exclude)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to search lots", e))
    }

    async fn allocate(&self, user_id: &str, lot_id: i32) -> AppResult<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        let updated = sqlx::query(
            "UPDATE parking_lots SET num_allocated = num_allocated + 1 \
             WHERE id = $1 AND num_allocated < num_available",
        )
        .bind(lot_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to increment allocation", e)
        })?;

        if updated.rows_affected() == 0 {
            warn!(lot_id, user_id, "Lot unknown or full when committing allocation");
            return Ok(false);
        }

        let inserted = sqlx::query("INSERT INTO allocations (user_id, lot_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(lot_id)
            .execute(&mut *tx)
            .await;

        match inserted {
            Ok(_) => {
                tx.commit().await.map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to commit allocation", e)
                })?;
                Ok(true)
            }
            Err(e) if is_unique_violation(&e) => {
                // Dropping the transaction rolls back the increment.
                warn!(user_id, "User already holds an allocation");
                Ok(false)
            }
            Err(e) => Err(AppError::with_source(
                ErrorKind::Database,
                "Failed to insert allocation",
                e,
            )),
        }
    }

    async fn deallocate(&self, user_id: &str) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        let lot_id: Option<i32> =
            sqlx::query_scalar("DELETE FROM allocations WHERE user_id = $1 RETURNING lot_id")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to delete allocation", e)
                })?;

        if let Some(lot_id) = lot_id {
            sqlx::query(
                "UPDATE parking_lots SET num_allocated = GREATEST(num_allocated - 1, 0) \
                 WHERE id = $1",
            )
            .bind(lot_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to decrement allocation", e)
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit deallocation", e)
        })
    }

    async fn get_allocations(&self, lot_id: i32) -> AppResult<Vec<Allocation>> {
        sqlx::query_as::<_, Allocation>(
            "SELECT user_id, lot_id, seq FROM allocations WHERE lot_id = $1 ORDER BY seq ASC",
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to fetch allocations", e))
    }
}

/// Whether a sqlx error is a primary-key/unique-index violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
