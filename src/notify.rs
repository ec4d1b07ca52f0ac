use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Booking;

const CHANNEL_CAPACITY: usize = 256;

/// A lifecycle notification: which room, what happened, and a JSON snapshot
/// of the booking as of the transition.
#[derive(Debug, Clone)]
pub struct Notice {
    pub room_id: Ulid,
    pub kind: &'static str,
    pub payload: String,
}

/// Broadcast hub for LISTEN/NOTIFY. Per-room channels plus one firehose
/// channel carrying every booking notice on the property.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
    firehose: broadcast::Sender<Notice>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            firehose: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notifications for one room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every booking notice on the property.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notice> {
        self.firehose.subscribe()
    }

    /// Publish a lifecycle notice. No-op when nobody is listening; a JSON
    /// payload is only rendered if at least one receiver exists.
    pub fn send(&self, room_id: Ulid, kind: &'static str, booking: &Booking) {
        let room_sender = self.channels.get(&room_id);
        let has_room_rx = room_sender.as_ref().is_some_and(|s| s.receiver_count() > 0);
        let has_all_rx = self.firehose.receiver_count() > 0;
        if !has_room_rx && !has_all_rx {
            return;
        }

        let payload = serde_json::json!({
            "kind": kind,
            "booking": booking,
        })
        .to_string();
        let notice = Notice { room_id, kind, payload };

        if let Some(sender) = room_sender {
            let _ = sender.send(notice.clone());
        }
        let _ = self.firehose.send(notice);
    }

    /// Remove a room's channel when the room is deleted.
    pub fn remove(&self, room_id: &Ulid) {
        self.channels.remove(room_id);
    }
}
