use super::hub::EventHub;
use crate::application::bridge::LifecycleBridge;
use crate::ports::encoder::EncoderLauncher;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Feed every notification published on `event_hub` into `bridge`.
pub fn start<L>(event_hub: Arc<EventHub>, bridge: Arc<LifecycleBridge<L>>) -> JoinHandle<()>
where
    L: EncoderLauncher + 'static,
{
    let mut rx = event_hub.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    bridge.handle(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lifecycle listener fell behind, notifications lost");
                }
                Err(RecvError::Closed) => {
                    info!("event hub closed, lifecycle listener exiting");
                    break;
                }
            }
        }
    })
}
