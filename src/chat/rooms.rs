//! Room-scoped fan-out, independent of the websocket transport.
//!
//! Rooms are keyed by quest-instance id. Publishing is lossy by design:
//! delivery happens only to subscribers connected at that moment, while
//! persistence is the sender's responsibility before publishing.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::db::models::ChatMessage;

const ROOM_BUFFER: usize = 64;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, broadcast::Sender<ChatMessage>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a room, creating it on first use.
    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<ChatMessage> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_BUFFER).0)
            .subscribe()
    }

    /// Fan a message out to current subscribers. Returns the number of
    /// subscribers that observed it; a room nobody joined yet swallows the
    /// message.
    pub fn publish(&self, room: &str, message: ChatMessage) -> usize {
        let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        match rooms.get(room) {
            Some(tx) => tx.send(message).unwrap_or(0),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            id: "m1".into(),
            instance_id: "i1".into(),
            user_id: "u1".into(),
            user_name: "Alice".into(),
            text: text.into(),
            created_at: "2026-01-01T00:00:00+00:00".into(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let registry = RoomRegistry::new();
        let mut rx = registry.subscribe("i1");

        let delivered = registry.publish("i1", message("hello"));
        assert_eq!(delivered, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.text, "hello");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.publish("empty-room", message("into the void")), 0);
    }

    #[tokio::test]
    async fn all_subscribers_of_a_room_receive() {
        let registry = RoomRegistry::new();
        let mut rx1 = registry.subscribe("i1");
        let mut rx2 = registry.subscribe("i1");

        assert_eq!(registry.publish("i1", message("hi")), 2);
        assert_eq!(rx1.recv().await.unwrap().text, "hi");
        assert_eq!(rx2.recv().await.unwrap().text, "hi");
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let mut rx_other = registry.subscribe("i2");

        registry.subscribe("i1");
        registry.publish("i1", message("only room one"));

        assert!(rx_other.try_recv().is_err());
    }
}
