//! Per-connection sessions and the manager that opens them
//!
//! A [`Session`] exists exactly while its client is connected; the rooms it
//! belongs to are the set held by its [`Connection`]. `disconnect` consumes
//! the session, so the disconnect path runs once per connection.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::broker::SharedBroker;
use crate::core::connection::{Connection, Outbound};
use crate::core::message::ChatMessage;
use crate::core::message_types::ServerMessage;
use crate::core::room::RoomRegistry;
use crate::error::Result;

/// Process-wide entry point: owns the room registry and tracks live sessions
pub struct SessionManager {
    broker: SharedBroker,
    registry: Arc<RoomRegistry>,
    connections: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl SessionManager {
    pub fn new(broker: SharedBroker) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::new(broker.clone())),
            broker,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new client connection
    pub fn open_session(self: &Arc<Self>, outbound: Outbound) -> Session {
        let connection = Connection::new(outbound);
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection.id().to_string(), Utc::now());

        Session {
            connection,
            manager: Arc::clone(self),
        }
    }

    fn unregister(&self, id: &str) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    // Get current clients count
    pub fn client_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}

// Thread-safe session manager wrapper
pub type SharedSessionManager = Arc<SessionManager>;

// Create a new shared session manager on top of a broker
pub fn create_session_manager(broker: SharedBroker) -> SharedSessionManager {
    Arc::new(SessionManager::new(broker))
}

/// One connected client
pub struct Session {
    connection: Connection,
    manager: SharedSessionManager,
}

impl Session {
    pub fn id(&self) -> &str {
        self.connection.id()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send an event to this client only
    pub fn notify(&self, event: ServerMessage) -> bool {
        self.connection.send(event)
    }

    /// Join a room.
    ///
    /// Returns `Ok(false)` if the room was already joined. On failure the
    /// session stays out of the room.
    pub async fn join_room(&mut self, room: &str) -> Result<bool> {
        if !self.connection.mark_joined(room) {
            debug!("Client {} already in room {}", self.id(), room);
            return Ok(false);
        }

        let member = self.connection.as_member();
        match self.manager.registry.join(room, &member).await {
            Ok(()) => {
                info!("Client {} joined room {}", self.id(), room);
                Ok(true)
            }
            Err(e) => {
                self.connection.mark_left(room);
                Err(e)
            }
        }
    }

    /// Leave a room. Returns false if the room was not joined.
    ///
    /// The room leaves the session's set even if the broker unsubscribe fails.
    pub async fn leave_room(&mut self, room: &str) -> bool {
        if !self.connection.is_member(room) {
            return false;
        }

        // The set is updated after the registry so that a cancelled leave
        // is still released when the session drops.
        let result = self.manager.registry.leave(room, self.connection.id()).await;
        self.connection.mark_left(room);

        if let Err(e) = result {
            debug!("Client {} left room {} with broker error: {}", self.id(), room, e);
        }
        info!("Client {} left room {}", self.id(), room);
        true
    }

    /// Publish a chat message to a joined room.
    ///
    /// Messages for rooms the session has not joined are dropped and
    /// `Ok(false)` is returned. The sender's own copy comes back through the
    /// broker like everyone else's.
    pub async fn send_message(
        &self,
        room: &str,
        text: String,
        sender_display_name: String,
        sender_id: String,
    ) -> Result<bool> {
        if !self.connection.is_member(room) {
            debug!("Dropping message from {} to room {} it has not joined", self.id(), room);
            return Ok(false);
        }

        let payload = ChatMessage::new(text, sender_display_name, sender_id).encode()?;
        debug!("Publishing message from {} to room {}", self.id(), room);
        self.manager.broker.publish(room, payload).await?;
        Ok(true)
    }

    /// Leave every joined room and close the session
    pub async fn disconnect(mut self) {
        let rooms = self.connection.joined_rooms();
        for room in &rooms {
            self.leave_room(room).await;
        }

        info!(
            "Client {} disconnected from rooms: [{}] after {:?}",
            self.id(),
            rooms.join(", "),
            self.connection.connection_duration()
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let id = self.connection.id().to_string();
        self.manager.unregister(&id);

        let rooms = self.connection.take_rooms();
        if rooms.is_empty() {
            return;
        }

        // Only reached when the session was dropped without a completed disconnect
        warn!("Session {} dropped while in {} rooms, releasing them", id, rooms.len());
        let registry = Arc::clone(&self.manager.registry);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for room in rooms {
                        // Failures are already logged by the registry
                        let _ = registry.leave(&room, &id).await;
                    }
                });
            }
            Err(e) => error!("Cannot release rooms of session {}: {}", id, e),
        }
    }
}
