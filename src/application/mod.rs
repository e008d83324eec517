//! Application layer - Services driving the encoder port.

pub mod bridge;
pub mod supervisor;
