//! HTTP inbound adapter: ingest webhooks, control API and the media tree.

mod api;
mod hooks;

use crate::adapters::events::hub::EventHub;
use crate::application::bridge::LifecycleBridge;
use crate::ports::encoder::EncoderLauncher;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub struct AppState<L> {
    pub bridge: Arc<LifecycleBridge<L>>,
    pub hub: Arc<EventHub>,
    /// Base URL players use to reach the media tree, e.g. `http://host:8000/media`.
    pub public_base_url: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid stream key {0:?}")]
    InvalidKey(String),
    #[error("lifecycle listener is not running")]
    ListenerDown,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            ApiError::ListenerDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, [(header::CONTENT_TYPE, "text/plain")], self.to_string()).into_response()
    }
}

pub fn router<L>(state: Arc<AppState<L>>, media_root: &Path) -> Router
where
    L: EncoderLauncher + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/hooks/publish", post(hooks::publish::<L>))
        .route("/hooks/publish_done", post(hooks::publish_done::<L>))
        .route("/api/keys", post(api::create_key::<L>))
        .route("/api/streams", get(api::list_streams::<L>))
        .route("/api/streams/:key/master.m3u8", get(api::master_playlist::<L>))
        .with_state(state)
        .nest_service("/media", ServeDir::new(media_root))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
