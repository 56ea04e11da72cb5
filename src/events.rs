use tokio::sync::broadcast;

use crate::model::{ProcessingInfo, Task, TaskDetail};

const CHANNEL_CAPACITY: usize = 256;

/// State changes published at every write-through point of a run.
#[derive(Debug, Clone)]
pub enum Event {
    TaskUpdated(Task),
    ProcessingInfoUpdated(ProcessingInfo),
    DetailUpdated(TaskDetail),
    /// Rounded percentage of a running upload or download.
    TransferProgress { detail_id: u64, path: String, percent: u8 },
}

/// Publishing never fails; with no subscriber the event is dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}
