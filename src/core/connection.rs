//! Client connection bookkeeping
//! Tracks the identity, outbound channel and joined rooms of one client

use log::warn;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::message_types::ServerMessage;

/// Queue of events waiting to be written to a client
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// What the room registry keeps about a member: where to deliver and to whom
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: String,
    pub outbound: Outbound,
}

impl Member {
    /// Push an event onto the member's outbound queue
    pub fn deliver(&self, event: ServerMessage) -> bool {
        match self.outbound.send(event) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to deliver to closed connection {}", self.connection_id);
                false
            }
        }
    }
}

/// Represents the state of a single client connection
pub struct Connection {
    id: String,
    sender: Outbound,
    joined_rooms: HashSet<String>,
    connected_at: Instant,
}

impl Connection {
    /// Create a new connection with a unique ID
    pub fn new(sender: Outbound) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), sender)
    }

    pub fn with_id(id: String, sender: Outbound) -> Self {
        Self {
            id,
            sender,
            joined_rooms: HashSet::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send an event directly to this client
    pub fn send(&self, event: ServerMessage) -> bool {
        match self.sender.send(event) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send message to client {}", self.id);
                false
            }
        }
    }

    /// Registry-side view of this connection
    pub fn as_member(&self) -> Member {
        Member {
            connection_id: self.id.clone(),
            outbound: self.sender.clone(),
        }
    }

    pub fn is_member(&self, room: &str) -> bool {
        self.joined_rooms.contains(room)
    }

    /// Returns false if the room was already joined
    pub(crate) fn mark_joined(&mut self, room: &str) -> bool {
        self.joined_rooms.insert(room.to_string())
    }

    /// Returns false if the room was not joined
    pub(crate) fn mark_left(&mut self, room: &str) -> bool {
        self.joined_rooms.remove(room)
    }

    pub(crate) fn take_rooms(&mut self) -> Vec<String> {
        self.joined_rooms.drain().collect()
    }

    /// Rooms currently joined, sorted by name
    pub fn joined_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.joined_rooms.iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_set_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(tx);

        assert!(connection.mark_joined("lobby"));
        assert!(!connection.mark_joined("lobby"));
        assert!(connection.is_member("lobby"));
        assert!(!connection.is_member("Lobby"));

        assert!(connection.mark_left("lobby"));
        assert!(!connection.mark_left("lobby"));
        assert!(connection.joined_rooms().is_empty());
    }

    #[test]
    fn test_member_delivers_to_connection_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::with_id("c1".to_string(), tx);
        let member = connection.as_member();

        assert_eq!(member.connection_id, "c1");
        assert!(member.deliver(ServerMessage::error("test", "ping")));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::error("test", "ping"));

        drop(rx);
        assert!(!member.deliver(ServerMessage::error("test", "gone")));
    }
}
