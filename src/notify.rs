use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ResourceId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for change notifications per resource.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<ResourceId, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes on a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: ResourceId) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, resource_id: ResourceId, event: &Event) {
        if let Some(sender) = self.channels.get(&resource_id) {
            let _ = sender.send(event.clone());
        }
    }
}
