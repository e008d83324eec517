//! Encoder processes backed by a local ffmpeg binary.

use crate::domain::ladder::EncodeInvocation;
use crate::domain::stream_key::StreamKey;
use crate::ports::encoder::{EncoderLauncher, EncoderProcess};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStderr, Command};
use tracing::{debug, warn};

/// Number of stderr lines kept for the exit report.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EncoderLauncher for FfmpegLauncher {
    async fn launch(&self, invocation: &EncodeInvocation) -> io::Result<Box<dyn EncoderProcess>> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL)));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(invocation.key.clone(), stderr, tail.clone()));
        }

        Ok(Box::new(FfmpegProcess {
            key: invocation.key.clone(),
            child,
            stdin,
            tail,
        }))
    }
}

async fn drain_stderr(key: StreamKey, stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(key = %key, "encoder: {}", line);
                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == STDERR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(key = %key, error = %e, "encoder stderr closed");
                break;
            }
        }
    }
}

pub struct FfmpegProcess {
    key: StreamKey,
    child: Child,
    stdin: Option<ChildStdin>,
    tail: Arc<Mutex<VecDeque<String>>>,
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn request_stop(&mut self) -> io::Result<()> {
        // ffmpeg finishes the current segment and exits on `q`.
        match self.stdin.take() {
            Some(mut stdin) => {
                stdin.write_all(b"q\n").await?;
                stdin.flush().await
            }
            None => self.child.start_kill(),
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        if !status.success() {
            let tail = self
                .tail
                .lock()
                .map(|t| t.iter().cloned().collect::<Vec<_>>().join("\n"))
                .unwrap_or_default();
            if !tail.is_empty() {
                warn!(key = %self.key, "encoder stderr before exit:\n{}", tail);
            }
        }
        Ok(status)
    }
}
