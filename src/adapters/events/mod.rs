//! Ingest server lifecycle notifications.

use crate::domain::stream_key::{self, SessionMetadata, StreamKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod hub;
pub mod listener;

/// What the ingest server reports about a publishing session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishSession {
    #[serde(default, alias = "id", alias = "sessionId")]
    pub session_id: String,
    #[serde(default, alias = "streamPath", alias = "path")]
    pub stream_path: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<SessionMetadata>,
}

impl PublishSession {
    pub fn resolve_key(&self) -> Option<StreamKey> {
        stream_key::resolve(
            self.stream_path.as_deref(),
            &self.args,
            self.metadata.as_ref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestEvent {
    PublishStart(PublishSession),
    PublishStop(PublishSession),
}

impl IngestEvent {
    pub fn session(&self) -> &PublishSession {
        match self {
            IngestEvent::PublishStart(session) | IngestEvent::PublishStop(session) => session,
        }
    }
}
