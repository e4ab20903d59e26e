//! # parkflow-session
//!
//! The session registry: the single shared, mutable piece of in-process
//! state tying the connection protocol to the allocation engine. Maps a
//! user id to its live connection handle, last known location, and
//! declined lot ids.

pub mod handle;
pub mod registry;

pub use handle::{ConnectionHandle, ConnectionId};
pub use registry::{RegisterOutcome, SessionRegistry, SessionSnapshot};
