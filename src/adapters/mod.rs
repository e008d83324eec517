//! Adapters - Concrete implementations of ports and inbound interfaces.

pub mod events;
pub mod ffmpeg;
pub mod fs;
pub mod http;
