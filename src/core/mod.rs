//! Core room membership, relay and session logic

pub mod connection;
pub mod message;
pub mod message_types;
pub mod relay;
pub mod room;
pub mod session;

// Re-export main components for convenience
pub use connection::{Connection, Member, Outbound};
pub use message::ChatMessage;
pub use message_types::{ClientMessage, ServerMessage};
pub use relay::Relay;
pub use room::{RoomRegistry, RoomSubscriptionState, Subscription};
pub use session::{create_session_manager, Session, SessionManager, SharedSessionManager};
