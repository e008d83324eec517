use super::IngestEvent;
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<IngestEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        // Notifications are tiny and drained continuously by the listener.
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    pub fn publish(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
