//! Webhooks the ingest server calls when a publisher connects or leaves.

use super::{ApiError, AppState};
use crate::adapters::events::{IngestEvent, PublishSession};
use crate::ports::encoder::EncoderLauncher;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::debug;

pub async fn publish<L>(
    State(state): State<Arc<AppState<L>>>,
    Json(session): Json<PublishSession>,
) -> Result<StatusCode, ApiError>
where
    L: EncoderLauncher + 'static,
{
    notify(&state, IngestEvent::PublishStart(session))
}

pub async fn publish_done<L>(
    State(state): State<Arc<AppState<L>>>,
    Json(session): Json<PublishSession>,
) -> Result<StatusCode, ApiError>
where
    L: EncoderLauncher + 'static,
{
    notify(&state, IngestEvent::PublishStop(session))
}

fn notify<L>(state: &AppState<L>, event: IngestEvent) -> Result<StatusCode, ApiError> {
    debug!(?event, "ingest notification");
    state
        .hub
        .publish(event)
        .map_err(|_| ApiError::ListenerDown)?;
    Ok(StatusCode::NO_CONTENT)
}
