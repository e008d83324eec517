use super::{ApiError, AppState};
use crate::domain::hls::compose_master;
use crate::domain::jobs::JobSnapshot;
use crate::domain::stream_key::StreamKey;
use crate::ports::encoder::EncoderLauncher;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct KeyGrant {
    pub stream_key: StreamKey,
    pub ingest_url: String,
    pub playback_url: String,
}

/// Hand out a fresh stream key with the URLs to publish and play it.
pub async fn create_key<L>(State(state): State<Arc<AppState<L>>>) -> Result<Json<KeyGrant>, ApiError>
where
    L: EncoderLauncher + 'static,
{
    let raw = Uuid::new_v4().simple().to_string();
    let stream_key = StreamKey::parse(&raw).ok_or(ApiError::InvalidKey(raw))?;

    Ok(Json(KeyGrant {
        ingest_url: state.bridge.source().locator(&stream_key),
        playback_url: format!("/api/streams/{stream_key}/master.m3u8"),
        stream_key,
    }))
}

pub async fn list_streams<L>(State(state): State<Arc<AppState<L>>>) -> Json<Vec<JobSnapshot>>
where
    L: EncoderLauncher + 'static,
{
    Json(state.bridge.supervisor().snapshot().await)
}

pub async fn master_playlist<L>(
    State(state): State<Arc<AppState<L>>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    L: EncoderLauncher + 'static,
{
    let key = StreamKey::parse(&key).ok_or(ApiError::InvalidKey(key))?;
    let text = compose_master(&key, state.bridge.planner().ladder(), &state.public_base_url);

    Ok((
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        text,
    ))
}
