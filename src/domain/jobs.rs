use super::stream_key::StreamKey;
use serde::Serialize;
use std::path::PathBuf;

/// Settled view of an identity, as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub key: StreamKey,
    pub state: JobState,
    pub active: bool,
    pub generation: Option<u64>,
    pub pid: Option<u32>,
    pub mode: Option<&'static str>,
    pub renditions: Vec<String>,
    pub output_dir: Option<PathBuf>,
    pub uptime_secs: Option<u64>,
}

impl JobSnapshot {
    pub fn idle(key: StreamKey) -> Self {
        Self::pending(key, JobState::Absent)
    }

    /// An identity whose job details are not available right now.
    pub fn pending(key: StreamKey, state: JobState) -> Self {
        Self {
            key,
            state,
            active: false,
            generation: None,
            pid: None,
            mode: None,
            renditions: Vec::new(),
            output_dir: None,
            uptime_secs: None,
        }
    }
}

/// Lifecycle notifications published by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started {
        key: StreamKey,
        generation: u64,
        pid: Option<u32>,
    },
    StartFailed {
        key: StreamKey,
        reason: String,
    },
    Exited {
        key: StreamKey,
        generation: u64,
        code: Option<i32>,
        success: bool,
    },
}

impl JobEvent {
    pub fn key(&self) -> &StreamKey {
        match self {
            JobEvent::Started { key, .. }
            | JobEvent::StartFailed { key, .. }
            | JobEvent::Exited { key, .. } => key,
        }
    }
}

/// Per-identity job state. `Starting` and `Stopping` only exist inside the
/// identity's serialized section; settled observers see `Absent` or `Running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Absent,
    Starting,
    Running,
    Stopping,
}

impl JobState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_become(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Absent, Starting)
                | (Starting, Running)
                | (Starting, Absent)
                | (Running, Stopping)
                | (Running, Absent)
                | (Stopping, Absent)
        )
    }
}
