use crate::domain::ladder::EncodeInvocation;
use async_trait::async_trait;
use std::io;
use std::process::ExitStatus;

/// Launches encoder processes from planned invocations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    /// Spawn the process described by `invocation`. Must not wait for it to exit.
    async fn launch(&self, invocation: &EncodeInvocation) -> io::Result<Box<dyn EncoderProcess>>;
}

/// Handle to one running encoder process.
#[async_trait]
pub trait EncoderProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to finish its current segment and exit.
    async fn request_stop(&mut self) -> io::Result<()>;

    /// Forcibly terminate the process.
    fn kill(&mut self) -> io::Result<()>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> io::Result<ExitStatus>;
}
