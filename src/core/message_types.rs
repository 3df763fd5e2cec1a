//! Message types for room-based communication

use serde::{Deserialize, Serialize};

use crate::core::message::ChatMessage;

/// Client-to-server message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join a room
    #[serde(rename = "join_room")]
    JoinRoom { room: String },

    /// Leave a room
    #[serde(rename = "leave_room")]
    LeaveRoom { room: String },

    /// Send a message to a room
    #[serde(rename = "chat_message")]
    ChatMessage {
        room: String,
        text: String,
        #[serde(rename = "senderDisplayName")]
        sender_display_name: String,
        #[serde(rename = "senderId")]
        sender_id: String,
    },
}

/// Server-to-client message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Connection established
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Message relayed from a room
    #[serde(rename = "chat_message")]
    ChatMessage {
        room: String,
        text: String,
        #[serde(rename = "senderDisplayName")]
        sender_display_name: String,
        #[serde(rename = "senderId")]
        sender_id: String,
    },

    /// Error message
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    /// Wrap a relayed payload for delivery to a room member
    pub fn chat(room: &str, message: ChatMessage) -> Self {
        ServerMessage::ChatMessage {
            room: room.to_string(),
            text: message.text,
            sender_display_name: message.sender_display_name,
            sender_id: message.sender_id,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
