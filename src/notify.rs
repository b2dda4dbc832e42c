use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-field booking events. Backs the SSE watch endpoint
/// so calendar views can refresh without polling.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a field. Creates the channel if needed.
    pub fn subscribe(&self, field_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(field_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is watching the field.
    pub fn send(&self, field_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&field_id) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let fid = Ulid::new();
        let mut rx = hub.subscribe(fid);

        let event = Event::FieldDeactivated { id: fid };
        hub.send(fid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let fid = Ulid::new();
        hub.send(fid, &Event::FieldDeactivated { id: fid });
    }
}
