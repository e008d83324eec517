//! Encoder process supervision.
//!
//! The supervisor owns the identity -> job registry. Each identity has its own
//! async mutex, which is the single serialization point for start, stop and
//! exit handling of that identity. Distinct identities never share a lock, so
//! one stream's directory cleanup or spawn never delays another's.

use crate::adapters::fs::{DirectoryError, OutputDirectories};
use crate::domain::jobs::{JobEvent, JobSnapshot, JobState};
use crate::domain::ladder::{EncodeInvocation, Ladder};
use crate::domain::stream_key::StreamKey;
use crate::ports::encoder::{EncoderLauncher, EncoderProcess};
use dashmap::DashMap;
use futures::future::join_all;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Extra time shutdown allows past the stop grace for killed encoders to be reaped.
const REAP_SLACK: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("could not spawn encoder for {key}: {source}")]
    Spawn {
        key: StreamKey,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { generation: u64 },
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

struct EncodeJob {
    generation: u64,
    ladder: Ladder,
    output_dir: PathBuf,
    pid: Option<u32>,
    started_at: Instant,
    stop_tx: Option<oneshot::Sender<()>>,
    watcher: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    state: JobState,
    job: Option<EncodeJob>,
}

impl Slot {
    fn advance(&mut self, key: &StreamKey, next: JobState) {
        if !self.state.can_become(next) {
            warn!(key = %key, from = ?self.state, to = ?next, "unexpected job state change");
        }
        debug!(key = %key, from = ?self.state, to = ?next, "job state");
        self.state = next;
    }
}

struct Inner<L> {
    launcher: L,
    directories: OutputDirectories,
    slots: DashMap<StreamKey, Arc<Mutex<Slot>>>,
    generations: AtomicU64,
    stop_grace: Option<Duration>,
    events: broadcast::Sender<JobEvent>,
}

pub struct Supervisor<L> {
    inner: Arc<Inner<L>>,
}

impl<L> Clone for Supervisor<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L> Supervisor<L>
where
    L: EncoderLauncher + 'static,
{
    /// `stop_grace` bounds how long a stopped encoder may take to exit before
    /// it is killed; `None` waits indefinitely.
    pub fn new(launcher: L, directories: OutputDirectories, stop_grace: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                launcher,
                directories,
                slots: DashMap::new(),
                generations: AtomicU64::new(0),
                stop_grace,
                events,
            }),
        }
    }

    pub fn directories(&self) -> &OutputDirectories {
        &self.inner.directories
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn launcher_for_tests(&self) -> &L {
        &self.inner.launcher
    }

    fn slot(&self, key: &StreamKey) -> Arc<Mutex<Slot>> {
        Arc::clone(&self.inner.slots.entry(key.clone()).or_default())
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Start an encoder for `invocation.key` unless one is already running.
    ///
    /// The output directory is cleared before the process is spawned. On
    /// failure the identity is left free; nothing is retried.
    pub async fn start(&self, invocation: EncodeInvocation) -> Result<StartOutcome, SupervisorError> {
        let key = invocation.key.clone();
        let entry = self.slot(&key);
        let mut slot = entry.lock().await;

        if let Some(job) = &slot.job {
            debug!(key = %key, generation = job.generation, "encoder already running, start ignored");
            return Ok(StartOutcome::AlreadyRunning);
        }
        slot.advance(&key, JobState::Starting);

        let output_dir = match self.inner.directories.prepare(&key).await {
            Ok(dir) => dir,
            Err(e) => {
                error!(key = %key, error = %e, "output directory unavailable, encoder not started");
                slot.advance(&key, JobState::Absent);
                self.emit(JobEvent::StartFailed {
                    key: key.clone(),
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let process = match self.inner.launcher.launch(&invocation).await {
            Ok(process) => process,
            Err(source) => {
                error!(key = %key, program = ?invocation.program, error = %source, "encoder spawn failed");
                slot.advance(&key, JobState::Absent);
                self.emit(JobEvent::StartFailed {
                    key: key.clone(),
                    reason: source.to_string(),
                });
                return Err(SupervisorError::Spawn { key, source });
            }
        };

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let pid = process.pid();
        let (stop_tx, stop_rx) = oneshot::channel();
        // The watcher cannot touch the slot before this section releases it.
        let watcher = tokio::spawn(self.clone().watch(key.clone(), generation, process, stop_rx));

        slot.job = Some(EncodeJob {
            generation,
            ladder: invocation.ladder.clone(),
            output_dir,
            pid,
            started_at: Instant::now(),
            stop_tx: Some(stop_tx),
            watcher,
        });
        slot.advance(&key, JobState::Running);

        info!(
            key = %key,
            generation,
            pid = ?pid,
            mode = invocation.ladder.mode_name(),
            renditions = ?invocation.ladder.labels(),
            "encoder started"
        );
        self.emit(JobEvent::Started {
            key,
            generation,
            pid,
        });
        Ok(StartOutcome::Started { generation })
    }

    /// Signal the running encoder for `key` to stop and free the identity.
    ///
    /// Returns as soon as the signal is posted; the process exits on its own time.
    pub async fn stop(&self, key: &StreamKey) -> StopOutcome {
        match self.signal_stop(key).await {
            Some(_) => StopOutcome::Stopped,
            None => StopOutcome::NotRunning,
        }
    }

    /// Unregister the job for `key` and hand back its watcher, which finishes
    /// once the process has exited.
    async fn signal_stop(&self, key: &StreamKey) -> Option<JoinHandle<()>> {
        let entry = self.inner.slots.get(key).map(|e| Arc::clone(e.value()))?;
        let mut slot = entry.lock().await;

        let Some(mut job) = slot.job.take() else {
            debug!(key = %key, "stop requested but no encoder is running");
            return None;
        };
        slot.advance(key, JobState::Stopping);
        if let Some(stop_tx) = job.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        slot.advance(key, JobState::Absent);
        info!(key = %key, generation = job.generation, pid = ?job.pid, "encoder stop requested");
        Some(job.watcher)
    }

    pub async fn is_running(&self, key: &StreamKey) -> bool {
        let Some(entry) = self.inner.slots.get(key).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        let running = entry.lock().await.job.is_some();
        running
    }

    /// Every identity seen so far, with its current job if any, ordered by key.
    ///
    /// Never waits on an identity's lock. A slot is only held for long while
    /// its encoder is starting, so a busy slot is reported as `Starting`.
    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        let mut entries: Vec<(StreamKey, Arc<Mutex<Slot>>)> = self
            .inner
            .slots
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        entries
            .into_iter()
            .map(|(key, entry)| {
                let Ok(slot) = entry.try_lock() else {
                    return JobSnapshot::pending(key, JobState::Starting);
                };
                let snapshot = match &slot.job {
                    Some(job) => JobSnapshot {
                        key,
                        state: slot.state,
                        active: true,
                        generation: Some(job.generation),
                        pid: job.pid,
                        mode: Some(job.ladder.mode_name()),
                        renditions: job.ladder.labels(),
                        output_dir: Some(job.output_dir.clone()),
                        uptime_secs: Some(job.started_at.elapsed().as_secs()),
                    },
                    None => JobSnapshot::pending(key, slot.state),
                };
                snapshot
            })
            .collect()
    }

    /// Stop every running encoder and wait for them to exit.
    ///
    /// With a stop grace configured the wait is bounded by the grace plus the
    /// time needed to reap killed processes.
    pub async fn shutdown(&self) {
        let keys: Vec<StreamKey> = self.inner.slots.iter().map(|e| e.key().clone()).collect();
        let watchers: Vec<JoinHandle<()>> = join_all(keys.iter().map(|key| self.signal_stop(key)))
            .await
            .into_iter()
            .flatten()
            .collect();
        let stopped = watchers.len() as u64;
        info!(stopped, "waiting for encoders to exit");

        let exits = join_all(watchers);
        let finished = match self.inner.stop_grace {
            Some(grace) => tokio::time::timeout(grace + REAP_SLACK, exits).await.is_ok(),
            None => {
                exits.await;
                true
            }
        };
        if finished {
            info!(stopped, "supervisor shut down");
        } else {
            warn!(stopped, "encoders still running at shutdown");
        }
    }

    async fn watch(
        self,
        key: StreamKey,
        generation: u64,
        mut process: Box<dyn EncoderProcess>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        // A dropped sender means the supervisor is gone; treat it as a stop.
        let exited = tokio::select! {
            status = process.wait() => Some(status),
            _ = &mut stop_rx => None,
        };
        let status = match exited {
            Some(status) => status,
            None => self.terminate(&key, process.as_mut()).await,
        };
        self.on_exit(key, generation, status).await;
    }

    async fn terminate(
        &self,
        key: &StreamKey,
        process: &mut dyn EncoderProcess,
    ) -> io::Result<ExitStatus> {
        if let Err(e) = process.request_stop().await {
            warn!(key = %key, error = %e, "graceful stop failed, killing encoder");
            process.kill()?;
        }

        let Some(grace) = self.inner.stop_grace else {
            return process.wait().await;
        };
        match tokio::time::timeout(grace, process.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(key = %key, grace_secs = grace.as_secs_f64(), "encoder ignored stop, killing");
                process.kill()?;
                process.wait().await
            }
        }
    }

    async fn on_exit(&self, key: StreamKey, generation: u64, status: io::Result<ExitStatus>) {
        let (code, success) = match &status {
            Ok(status) if status.success() => {
                info!(key = %key, generation, "encoder exited");
                (status.code(), true)
            }
            Ok(status) => {
                warn!(key = %key, generation, code = ?status.code(), "encoder exited with failure");
                (status.code(), false)
            }
            Err(e) => {
                error!(key = %key, generation, error = %e, "lost track of encoder process");
                (None, false)
            }
        };

        let entry = self.slot(&key);
        let mut slot = entry.lock().await;
        if slot.job.as_ref().is_some_and(|job| job.generation == generation) {
            slot.job = None;
            slot.advance(&key, JobState::Absent);
        }
        self.emit(JobEvent::Exited {
            key,
            generation,
            code,
            success,
        });
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::ffmpeg::FfmpegLauncher;
    use crate::domain::ladder::{GopPolicy, LadderPlanner};
    use crate::ports::encoder::MockEncoderLauncher;
    use async_trait::async_trait;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::{mpsc, Barrier};

    const WAIT: Duration = Duration::from_secs(5);

    /// Process double: exits when a raw wait status arrives on its channel.
    pub(crate) struct FakeProcess {
        pid: u32,
        exits: mpsc::UnboundedReceiver<i32>,
        control: mpsc::UnboundedSender<i32>,
        ignore_stop: bool,
        stop_requests: Arc<AtomicUsize>,
    }

    impl FakeProcess {
        pub(crate) fn new(pid: u32, ignore_stop: bool) -> (Self, mpsc::UnboundedSender<i32>) {
            let (control, exits) = mpsc::unbounded_channel();
            let process = Self {
                pid,
                exits,
                control: control.clone(),
                ignore_stop,
                stop_requests: Arc::new(AtomicUsize::new(0)),
            };
            (process, control)
        }
    }

    #[async_trait]
    impl EncoderProcess for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        async fn request_stop(&mut self) -> io::Result<()> {
            self.stop_requests.fetch_add(1, Ordering::SeqCst);
            if !self.ignore_stop {
                let _ = self.control.send(0);
            }
            Ok(())
        }

        fn kill(&mut self) -> io::Result<()> {
            // SIGKILL
            let _ = self.control.send(9);
            Ok(())
        }

        async fn wait(&mut self) -> io::Result<ExitStatus> {
            match self.exits.recv().await {
                Some(raw) => Ok(ExitStatus::from_raw(raw)),
                None => Err(io::Error::other("fake process channel closed")),
            }
        }
    }

    /// Launcher double recording every launch and handing out crash controls.
    #[derive(Default)]
    pub(crate) struct FakeLauncher {
        pub(crate) launches: AtomicUsize,
        pub(crate) controls: std::sync::Mutex<Vec<(StreamKey, mpsc::UnboundedSender<i32>)>>,
        pub(crate) stop_requests: std::sync::Mutex<Vec<Arc<AtomicUsize>>>,
        pub(crate) files_at_launch: std::sync::Mutex<Vec<usize>>,
        ignore_stop: bool,
        barrier: Option<Arc<Barrier>>,
    }

    impl FakeLauncher {
        fn crash(&self, index: usize, code: i32) {
            let controls = self.controls.lock().unwrap();
            controls[index].1.send(code << 8).unwrap();
        }
    }

    #[async_trait]
    impl EncoderLauncher for FakeLauncher {
        async fn launch(
            &self,
            invocation: &EncodeInvocation,
        ) -> io::Result<Box<dyn EncoderProcess>> {
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            let files = std::fs::read_dir(&invocation.output_dir)?.count();
            self.files_at_launch.lock().unwrap().push(files);

            let n = self.launches.fetch_add(1, Ordering::SeqCst) as u32;
            let (process, control) = FakeProcess::new(1000 + n, self.ignore_stop);
            self.stop_requests
                .lock()
                .unwrap()
                .push(process.stop_requests.clone());
            self.controls
                .lock()
                .unwrap()
                .push((invocation.key.clone(), control));
            Ok(Box::new(process))
        }
    }

    pub(crate) fn key(s: &str) -> StreamKey {
        StreamKey::parse(s).unwrap()
    }

    pub(crate) fn invocation(dirs: &OutputDirectories, key: &StreamKey) -> EncodeInvocation {
        let planner =
            LadderPlanner::new("ffmpeg", Ladder::PassThrough, GopPolicy::default()).unwrap();
        planner.plan(key, "rtmp://127.0.0.1:1935/live/x", &dirs.dir_for(key))
    }

    fn supervisor<L: EncoderLauncher + 'static>(
        launcher: L,
        grace: Option<Duration>,
    ) -> (Supervisor<L>, TempDir) {
        let temp_dir = tempdir().unwrap();
        let dirs = OutputDirectories::new(temp_dir.path());
        (Supervisor::new(launcher, dirs, grace), temp_dir)
    }

    async fn next_exit(rx: &mut broadcast::Receiver<JobEvent>) -> JobEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = rx.recv().await.unwrap();
                if matches!(event, JobEvent::Exited { .. }) {
                    return event;
                }
            }
        })
        .await
        .expect("no exit event")
    }

    #[tokio::test]
    async fn test_duplicate_start_spawns_once() {
        let mut launcher = MockEncoderLauncher::new();
        launcher.expect_launch().times(1).returning(|_| {
            let (process, _control) = FakeProcess::new(42, false);
            Ok(Box::new(process))
        });
        let (sup, _dir) = supervisor(launcher, None);
        let k = key("abc123");

        let first = sup.start(invocation(sup.directories(), &k)).await.unwrap();
        let second = sup.start(invocation(sup.directories(), &k)).await.unwrap();

        assert_eq!(first, StartOutcome::Started { generation: 1 });
        assert_eq!(second, StartOutcome::AlreadyRunning);
        assert!(sup.is_running(&k).await);
    }

    #[tokio::test]
    async fn test_duplicate_start_keeps_directory() {
        let launcher = FakeLauncher::default();
        let (sup, dir) = supervisor(launcher, None);
        let k = key("abc123");

        sup.start(invocation(sup.directories(), &k)).await.unwrap();
        let segment = dir.path().join("abc123").join("index_00001.ts");
        std::fs::write(&segment, b"live").unwrap();

        let outcome = sup.start(invocation(sup.directories(), &k)).await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyRunning);
        assert!(segment.exists());
    }

    #[tokio::test]
    async fn test_start_stop_frees_identity() {
        let launcher = FakeLauncher::default();
        let (sup, _dir) = supervisor(launcher, None);
        let mut events = sup.subscribe();
        let k = key("abc123");

        sup.start(invocation(sup.directories(), &k)).await.unwrap();
        assert_eq!(sup.stop(&k).await, StopOutcome::Stopped);
        assert!(!sup.is_running(&k).await);
        assert_eq!(sup.stop(&k).await, StopOutcome::NotRunning);

        // The graceful stop reaches the process and its exit is observed.
        let exit = next_exit(&mut events).await;
        assert!(matches!(exit, JobEvent::Exited { success: true, generation: 1, .. }));
        assert_eq!(
            sup.inner.launcher.stop_requests.lock().unwrap()[0].load(Ordering::SeqCst),
            1
        );

        let restart = sup.start(invocation(sup.directories(), &k)).await.unwrap();
        assert_eq!(restart, StartOutcome::Started { generation: 2 });
        assert_eq!(sup.inner.launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_crash_frees_identity() {
        let launcher = FakeLauncher::default();
        let (sup, _dir) = supervisor(launcher, None);
        let mut events = sup.subscribe();
        let k = key("abc123");

        sup.start(invocation(sup.directories(), &k)).await.unwrap();
        sup.inner.launcher.crash(0, 1);

        let exit = next_exit(&mut events).await;
        assert_eq!(
            exit,
            JobEvent::Exited {
                key: k.clone(),
                generation: 1,
                code: Some(1),
                success: false,
            }
        );
        assert!(!sup.is_running(&k).await);

        let restart = sup.start(invocation(sup.directories(), &k)).await.unwrap();
        assert!(matches!(restart, StartOutcome::Started { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_frees_identity() {
        let mut launcher = MockEncoderLauncher::new();
        let mut seq = mockall::Sequence::new();
        launcher
            .expect_launch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(io::Error::new(io::ErrorKind::NotFound, "no ffmpeg")));
        launcher
            .expect_launch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Box::new(FakeProcess::new(7, false).0)));
        let (sup, _dir) = supervisor(launcher, None);
        let k = key("abc123");

        let err = sup.start(invocation(sup.directories(), &k)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(!sup.is_running(&k).await);

        let retry = sup.start(invocation(sup.directories(), &k)).await.unwrap();
        assert!(matches!(retry, StartOutcome::Started { .. }));
    }

    #[tokio::test]
    async fn test_directory_failure_does_not_spawn() {
        let mut launcher = MockEncoderLauncher::new();
        launcher.expect_launch().times(0);
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().join("root_is_a_file");
        std::fs::write(&root, b"").unwrap();
        let sup = Supervisor::new(launcher, OutputDirectories::new(&root), None);
        let k = key("abc123");

        let err = sup.start(invocation(sup.directories(), &k)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Directory(_)));
        assert!(!sup.is_running(&k).await);
    }

    #[tokio::test]
    async fn test_directory_cleared_before_spawn() {
        let launcher = FakeLauncher::default();
        let (sup, dir) = supervisor(launcher, None);
        let stream_dir = dir.path().join("abc123");
        std::fs::create_dir_all(&stream_dir).unwrap();
        std::fs::write(stream_dir.join("index.m3u8"), b"stale").unwrap();
        std::fs::write(stream_dir.join("index_00009.ts"), b"stale").unwrap();

        sup.start(invocation(sup.directories(), &key("abc123")))
            .await
            .unwrap();

        assert_eq!(*sup.inner.launcher.files_at_launch.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_late_exit_does_not_free_newer_job() {
        let launcher = FakeLauncher {
            ignore_stop: true,
            ..Default::default()
        };
        let (sup, _dir) = supervisor(launcher, None);
        let mut events = sup.subscribe();
        let k = key("abc123");

        sup.start(invocation(sup.directories(), &k)).await.unwrap();
        sup.stop(&k).await;
        let second = sup.start(invocation(sup.directories(), &k)).await.unwrap();
        assert_eq!(second, StartOutcome::Started { generation: 2 });

        // The first process finally dies after the second job took over.
        sup.inner.launcher.crash(0, 0);
        let exit = next_exit(&mut events).await;
        assert!(matches!(exit, JobEvent::Exited { generation: 1, .. }));
        assert!(sup.is_running(&k).await);
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill_after_grace() {
        let launcher = FakeLauncher {
            ignore_stop: true,
            ..Default::default()
        };
        let (sup, _dir) = supervisor(launcher, Some(Duration::from_millis(50)));
        let mut events = sup.subscribe();
        let k = key("abc123");

        sup.start(invocation(sup.directories(), &k)).await.unwrap();
        assert_eq!(sup.stop(&k).await, StopOutcome::Stopped);

        let exit = next_exit(&mut events).await;
        assert!(matches!(
            exit,
            JobEvent::Exited {
                code: None,
                success: false,
                ..
            }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_distinct_identities_start_in_parallel() {
        // Each launch waits for the other: serialized starts would deadlock.
        let launcher = FakeLauncher {
            barrier: Some(Arc::new(Barrier::new(2))),
            ..Default::default()
        };
        let (sup, _dir) = supervisor(launcher, None);
        let (s1, s2) = (key("s1"), key("s2"));

        let both = tokio::time::timeout(WAIT, async {
            tokio::join!(
                sup.start(invocation(sup.directories(), &s1)),
                sup.start(invocation(sup.directories(), &s2)),
            )
        })
        .await
        .expect("starts for distinct identities serialized");

        assert!(matches!(both.0, Ok(StartOutcome::Started { .. })));
        assert!(matches!(both.1, Ok(StartOutcome::Started { .. })));
        assert!(sup.is_running(&s1).await);
        assert!(sup.is_running(&s2).await);
    }

    #[tokio::test]
    async fn test_snapshot_lists_registered_identities() {
        let launcher = FakeLauncher::default();
        let (sup, dir) = supervisor(launcher, None);
        let (live, gone) = (key("live1"), key("gone1"));

        sup.start(invocation(sup.directories(), &live)).await.unwrap();
        sup.start(invocation(sup.directories(), &gone)).await.unwrap();
        sup.stop(&gone).await;

        let snapshot = sup.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0], JobSnapshot::idle(gone));
        assert_eq!(snapshot[1].key, live);
        assert_eq!(snapshot[1].state, JobState::Running);
        assert!(snapshot[1].active);
        assert_eq!(snapshot[1].mode, Some("pass_through"));
        assert_eq!(snapshot[1].output_dir, Some(dir.path().join("live1")));
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let launcher = FakeLauncher::default();
        let (sup, _dir) = supervisor(launcher, None);
        for k in ["a1", "b2", "c3"] {
            sup.start(invocation(sup.directories(), &key(k))).await.unwrap();
        }

        sup.shutdown().await;

        assert!(sup.snapshot().await.iter().all(|s| !s.active));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_encoders_to_exit() {
        let (sup, _dir) = supervisor(FakeLauncher::default(), Some(Duration::from_secs(5)));
        let mut events = sup.subscribe();
        for k in ["a1", "b2", "c3"] {
            sup.start(invocation(sup.directories(), &key(k))).await.unwrap();
        }

        sup.shutdown().await;

        let mut exited = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, JobEvent::Exited { success: true, .. }) {
                exited += 1;
            }
        }
        assert_eq!(exited, 3);
    }

    #[tokio::test]
    async fn test_shutdown_kills_encoder_ignoring_stop_after_grace() {
        let launcher = FakeLauncher {
            ignore_stop: true,
            ..Default::default()
        };
        let (sup, _dir) = supervisor(launcher, Some(Duration::from_millis(50)));
        let mut events = sup.subscribe();
        sup.start(invocation(sup.directories(), &key("stuck1")))
            .await
            .unwrap();

        sup.shutdown().await;

        let exit = next_exit(&mut events).await;
        assert!(matches!(exit, JobEvent::Exited { code: None, .. }));
    }

    #[tokio::test]
    async fn test_shutdown_lets_real_encoder_finish() {
        let (sup, dir) = supervisor(FfmpegLauncher::new(), Some(Duration::from_secs(5)));
        let k = key("abc123");
        let marker = dir.path().join("finished");
        let mut invocation = invocation(sup.directories(), &k);
        invocation.program = "/bin/sh".into();
        invocation.args = vec![
            "-c".to_string(),
            format!("read cmd; sleep 0.3; touch '{}'", marker.display()),
        ];

        sup.start(invocation).await.unwrap();
        sup.shutdown().await;

        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_snapshot_does_not_wait_for_starting_identity() {
        let barrier = Arc::new(Barrier::new(2));
        let launcher = FakeLauncher {
            barrier: Some(barrier.clone()),
            ..Default::default()
        };
        let (sup, _dir) = supervisor(launcher, None);
        let k = key("slow1");

        let starting = tokio::spawn({
            let sup = sup.clone();
            let invocation = invocation(sup.directories(), &k);
            async move { sup.start(invocation).await }
        });

        // The launch is parked on the barrier while the slot is held.
        let snapshot = tokio::time::timeout(WAIT, async {
            loop {
                let snapshot = sup.snapshot().await;
                if snapshot.first().is_some_and(|s| s.state == JobState::Starting) {
                    return snapshot;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("snapshot blocked behind a starting identity");
        assert_eq!(snapshot[0].key, k);
        assert!(!snapshot[0].active);

        barrier.wait().await;
        assert!(matches!(
            starting.await.unwrap(),
            Ok(StartOutcome::Started { .. })
        ));
        assert_eq!(sup.snapshot().await[0].state, JobState::Running);
    }
}
