//! # parkflow-core
//!
//! Core crate for ParkFlow. Contains configuration schemas, geographic
//! types, and the unified error system.
//!
//! This crate has **no** internal dependencies on other ParkFlow crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
