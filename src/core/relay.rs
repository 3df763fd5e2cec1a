//! Relay from broker deliveries to the local members of a room

use log::{debug, trace, warn};
use std::sync::{Arc, PoisonError};

use crate::broker::DeliveryCallback;
use crate::core::connection::Member;
use crate::core::message::ChatMessage;
use crate::core::message_types::ServerMessage;
use crate::core::room::MemberIndex;

/// Read-only view over the registry's member index
#[derive(Clone)]
pub struct Relay {
    members: MemberIndex,
}

impl Relay {
    pub(crate) fn new(members: MemberIndex) -> Self {
        Self { members }
    }

    /// Callback handed to the broker when a room is subscribed
    pub fn callback(&self) -> DeliveryCallback {
        let relay = self.clone();
        Arc::new(move |room: &str, raw: &str| {
            relay.deliver(room, raw);
        })
    }

    pub fn members_of(&self, room: &str) -> Vec<Member> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Decode a broker payload and push it to every local member of `room`.
    ///
    /// Undecodable payloads are logged and dropped. Returns how many members
    /// the message was queued for.
    pub fn deliver(&self, room: &str, raw: &str) -> usize {
        let message = match ChatMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable payload on room {}: {}", room, e);
                return 0;
            }
        };

        let members = self.members_of(room);
        if members.is_empty() {
            trace!("No local members in room {}, message dropped", room);
            return 0;
        }

        debug!(
            "Message received in room {} from {} ({})",
            room, message.sender_display_name, message.sender_id
        );

        let event = ServerMessage::chat(room, message);
        let delivered = members
            .iter()
            .filter(|member| member.deliver(event.clone()))
            .count();

        trace!("Relayed message in room {} to {}/{} members", room, delivered, members.len());
        delivered
    }
}
