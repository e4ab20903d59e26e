//! # parkflow-database
//!
//! PostgreSQL persistence layer for ParkFlow: pool management, embedded
//! migrations, the [`store::ParkingStore`] contract and its sqlx
//! implementation.

pub mod connection;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use repositories::parking::PgParkingStore;
pub use store::ParkingStore;
