//! Livecast Binary - Single-server deployment
//!
//! Wires up:
//! - The ffmpeg encoder adapter and per-stream output directories
//! - The process supervisor and the ingest lifecycle bridge
//! - HTTP: ingest webhooks, control API and the media tree

use livecast::adapters::events::{hub::EventHub, listener};
use livecast::adapters::ffmpeg::FfmpegLauncher;
use livecast::adapters::fs::OutputDirectories;
use livecast::adapters::http::{router, AppState};
use livecast::domain::ladder::LadderPlanner;
use livecast::{Config, IngestSource, LifecycleBridge, Supervisor};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // 1. Adapters
    let directories = OutputDirectories::new(&config.media_root);
    if let Err(e) = tokio::fs::create_dir_all(&config.media_root).await {
        error!(media_root = ?config.media_root, error = %e, "could not create media root");
        std::process::exit(1);
    }

    // 2. Application services
    let planner = match LadderPlanner::new(&config.ffmpeg_path, config.ladder.clone(), config.gop)
    {
        Ok(planner) => planner,
        Err(e) => {
            error!(error = %e, "invalid rendition ladder");
            std::process::exit(1);
        }
    };
    let supervisor = Supervisor::new(FfmpegLauncher::new(), directories, config.stop_grace);
    let source = IngestSource {
        host: config.ingest_host.clone(),
        port: config.ingest_port,
        app: config.ingest_app.clone(),
    };
    let bridge = Arc::new(LifecycleBridge::new(supervisor.clone(), planner, source));

    // 3. Lifecycle notifications
    let event_hub = Arc::new(EventHub::new());
    listener::start(event_hub.clone(), bridge.clone());

    // 4. HTTP layer
    let state = Arc::new(AppState {
        bridge,
        hub: event_hub,
        public_base_url: config.public_base_url.clone(),
    });
    let app = router(state, &config.media_root);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.http_addr, config.http_port))
        .await
        .expect("Failed to bind TCP listener");
    info!(
        addr = %config.http_addr,
        port = config.http_port,
        media_root = ?config.media_root,
        mode = config.ladder.mode_name(),
        "listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await;
    if let Err(e) = result {
        error!(error = %e, "server error");
    }

    supervisor.shutdown().await;
}
