//! # parkflow-entity
//!
//! Shared models for ParkFlow: the parking lot and allocation entities
//! plus the WebSocket wire envelope definitions.

pub mod allocation;
pub mod lot;
pub mod message;

pub use allocation::Allocation;
pub use lot::{NearbyLot, NewParkingLot, ParkingLot};
pub use message::{DecodeError, ErrorCode, ErrorInfo, WsMessage};
