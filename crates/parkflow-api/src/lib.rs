//! # parkflow-api
//!
//! HTTP and WebSocket surface for ParkFlow. Mobile clients connect at
//! `/ws/{user_id}`; sensors and operators manage lots under `/spaces`.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
