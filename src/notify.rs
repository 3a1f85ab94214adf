use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-business broadcast of committed events, for notification and
/// payment collaborators. Only events that reached the WAL are sent.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a business's events. Creates the channel if needed.
    pub fn subscribe(&self, business_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(business_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, business_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&business_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a business's channel; current receivers see it close.
    pub fn remove(&self, business_id: &Ulid) {
        self.channels.remove(business_id);
    }
}
