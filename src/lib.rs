//! Livecast - Live stream transcode orchestrator
//!
//! Hexagonal Architecture:
//! - domain/: Pure stream logic (stream keys, ladders, playlists, jobs)
//! - ports/: Trait definitions (encoder launcher and process)
//! - adapters/: Concrete implementations (ffmpeg, filesystem, events, HTTP)
//! - application/: Process supervision and the ingest lifecycle bridge
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports for convenience
pub use application::bridge::{IngestSource, LifecycleBridge};
pub use application::supervisor::{StartOutcome, StopOutcome, Supervisor, SupervisorError};
pub use config::Config;
pub use domain::hls;
pub use domain::stream_key::StreamKey;
