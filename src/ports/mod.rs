//! Ports - Trait definitions for the outside world the core drives.

pub mod encoder;
