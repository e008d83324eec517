//! Domain layer - Pure stream logic: identities, ladders, playlists and jobs.

pub mod hls;
pub mod jobs;
pub mod ladder;
pub mod stream_key;
