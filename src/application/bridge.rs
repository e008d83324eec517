//! Turns ingest lifecycle notifications into supervisor commands.
//!
//! Each identity gets a lane: an unbounded queue drained by one task. Commands
//! for one identity are applied strictly in arrival order, while lanes of
//! different identities run independently.

use super::supervisor::{StartOutcome, StopOutcome, Supervisor};
use crate::adapters::events::{IngestEvent, PublishSession};
use crate::domain::ladder::LadderPlanner;
use crate::domain::stream_key::StreamKey;
use crate::ports::encoder::EncoderLauncher;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Where the encoder pulls a published stream from.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSource {
    pub host: String,
    pub port: u16,
    pub app: String,
}

impl IngestSource {
    pub fn locator(&self, key: &StreamKey) -> String {
        format!("rtmp://{}:{}/{}/{}", self.host, self.port, self.app, key)
    }
}

#[derive(Debug)]
enum LaneCommand {
    Start { session_id: String },
    Stop { session_id: String },
}

pub struct LifecycleBridge<L> {
    supervisor: Supervisor<L>,
    planner: Arc<LadderPlanner>,
    source: Arc<IngestSource>,
    lanes: DashMap<StreamKey, mpsc::UnboundedSender<LaneCommand>>,
}

impl<L> LifecycleBridge<L>
where
    L: EncoderLauncher + 'static,
{
    pub fn new(supervisor: Supervisor<L>, planner: LadderPlanner, source: IngestSource) -> Self {
        Self {
            supervisor,
            planner: Arc::new(planner),
            source: Arc::new(source),
            lanes: DashMap::new(),
        }
    }

    pub fn supervisor(&self) -> &Supervisor<L> {
        &self.supervisor
    }

    pub fn planner(&self) -> &LadderPlanner {
        &self.planner
    }

    pub fn source(&self) -> &IngestSource {
        &self.source
    }

    /// Route one notification to its identity's lane.
    ///
    /// Returns the resolved key, or `None` if the session carried no usable
    /// stream key; nothing is started or stopped in that case.
    pub fn handle(&self, event: IngestEvent) -> Option<StreamKey> {
        let session = event.session();
        let Some(key) = session.resolve_key() else {
            warn!(
                session_id = %session.session_id,
                stream_path = ?session.stream_path,
                "could not resolve stream key, notification ignored"
            );
            return None;
        };

        let command = match event {
            IngestEvent::PublishStart(PublishSession { session_id, .. }) => {
                LaneCommand::Start { session_id }
            }
            IngestEvent::PublishStop(PublishSession { session_id, .. }) => {
                LaneCommand::Stop { session_id }
            }
        };
        debug!(key = %key, ?command, "dispatching lifecycle command");

        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| self.spawn_lane(key.clone()));
        if let Err(e) = lane.send(command) {
            error!(key = %key, command = ?e.0, "lane closed, command dropped");
        }
        Some(key)
    }

    fn spawn_lane(&self, key: StreamKey) -> mpsc::UnboundedSender<LaneCommand> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = self.supervisor.clone();
        let planner = self.planner.clone();
        let source = self.source.clone();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    LaneCommand::Start { session_id } => {
                        let output_dir = supervisor.directories().dir_for(&key);
                        let invocation = planner.plan(&key, &source.locator(&key), &output_dir);
                        match supervisor.start(invocation).await {
                            Ok(StartOutcome::Started { generation }) => {
                                info!(key = %key, %session_id, generation, "publish started");
                            }
                            Ok(StartOutcome::AlreadyRunning) => {
                                info!(key = %key, %session_id, "publish joined running stream");
                            }
                            // Already logged by the supervisor; the lane keeps serving.
                            Err(e) => debug!(key = %key, %session_id, error = %e, "start failed"),
                        }
                    }
                    LaneCommand::Stop { session_id } => match supervisor.stop(&key).await {
                        StopOutcome::Stopped => info!(key = %key, %session_id, "publish stopped"),
                        StopOutcome::NotRunning => {
                            debug!(key = %key, %session_id, "publish stopped with no encoder")
                        }
                    },
                }
            }
        });
        tx
    }
}
