//! # parkflow-realtime
//!
//! The per-connection protocol state machine: validates and dispatches
//! inbound envelopes, calls into the allocation engine and session
//! registry, and queues outbound envelopes for the socket driver.
//!
//! The state machine is transport-agnostic: it consumes text frames and
//! reports whether the connection should stay open, so the whole
//! protocol is drivable from tests without sockets. The axum WebSocket
//! glue lives in `parkflow-api`.

pub mod protocol;

pub use protocol::{Disposition, OpenOutcome, UserProtocol};
