//! Concrete repository implementations.

pub mod parking;
