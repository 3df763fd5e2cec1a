//! Room registry: reference-counted room membership and broker subscriptions
//!
//! Every join and leave runs under one async lifecycle lock, held across the
//! broker's subscribe and unsubscribe calls, so a room is subscribed exactly
//! once when its first local member arrives and unsubscribed exactly once
//! when the last one leaves. Membership itself lives in a separate index
//! that the relay reads synchronously; it is only written while the
//! lifecycle lock is held.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;

use crate::broker::{Broker, SharedBroker};
use crate::core::connection::Member;
use crate::core::relay::Relay;
use crate::error::{RedchatError, Result};

/// Room name to connection id to member
pub(crate) type MemberIndex = Arc<RwLock<HashMap<String, HashMap<String, Member>>>>;

/// Observable state of one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSubscriptionState {
    pub room: String,
    pub member_count: usize,
    pub subscribed: bool,
    pub subscribed_at: Option<DateTime<Utc>>,
}

/// Handle on a room's broker subscription.
///
/// The registry keeps one per subscribed room; dropping it from the table is
/// only done once the broker confirmed the unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    room: String,
    subscribed_at: DateTime<Utc>,
}

impl Subscription {
    async fn open(broker: &dyn Broker, room: &str, relay: &Relay) -> Result<Self> {
        broker.subscribe(room, relay.callback()).await?;
        Ok(Self {
            room: room.to_string(),
            subscribed_at: Utc::now(),
        })
    }

    async fn close(&self, broker: &dyn Broker) -> Result<()> {
        broker.unsubscribe(&self.room).await
    }

    pub fn subscribed_at(&self) -> DateTime<Utc> {
        self.subscribed_at
    }
}

/// Process-wide table of rooms with local members
pub struct RoomRegistry {
    broker: SharedBroker,
    /// Lifecycle lock; also the table of live subscriptions
    subscriptions: Mutex<HashMap<String, Subscription>>,
    members: MemberIndex,
    relay: Relay,
}

impl RoomRegistry {
    pub fn new(broker: SharedBroker) -> Self {
        let members: MemberIndex = Arc::new(RwLock::new(HashMap::new()));
        let relay = Relay::new(members.clone());

        Self {
            broker,
            subscriptions: Mutex::new(HashMap::new()),
            members,
            relay,
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    // Index mutations are single inserts or removes, so a poisoned lock
    // still guards a consistent map.
    fn index_read(&self) -> RwLockReadGuard<'_, HashMap<String, HashMap<String, Member>>> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_write(&self) -> RwLockWriteGuard<'_, HashMap<String, HashMap<String, Member>>> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a member to a room, subscribing the room on its first member.
    ///
    /// Joining a room the member already belongs to changes nothing. If the
    /// broker refuses the subscription, nothing is recorded and
    /// `JoinFailed` is returned.
    pub async fn join(&self, room: &str, member: &Member) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;

        if self.is_member(room, &member.connection_id) {
            debug!("Connection {} already in room {}", member.connection_id, room);
            return Ok(());
        }

        if !subscriptions.contains_key(room) {
            match Subscription::open(&*self.broker, room, &self.relay).await {
                Ok(subscription) => {
                    info!("Subscribed to broker channel for room {}", room);
                    subscriptions.insert(room.to_string(), subscription);
                }
                Err(e) => {
                    warn!("Join of room {} by {} rolled back: {}", room, member.connection_id, e);
                    return Err(RedchatError::JoinFailed {
                        room: room.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let member_count = {
            let mut index = self.index_write();
            let room_members = index.entry(room.to_string()).or_default();
            room_members.insert(member.connection_id.clone(), member.clone());
            room_members.len()
        };
        debug!(
            "Connection {} joined room {} ({} members)",
            member.connection_id, room, member_count
        );

        Ok(())
    }

    /// Remove a member from a room, unsubscribing the room when it empties.
    ///
    /// Leaving a room the member is not in changes nothing. If the broker
    /// refuses the unsubscribe, the subscription is kept (the next join
    /// reuses it) and `UnsubscribeFailed` is returned.
    pub async fn leave(&self, room: &str, connection_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;

        let emptied = {
            let mut index = self.index_write();
            let Some(room_members) = index.get_mut(room) else {
                return Ok(());
            };
            if room_members.remove(connection_id).is_none() {
                return Ok(());
            }
            debug!(
                "Connection {} left room {} ({} members)",
                connection_id,
                room,
                room_members.len()
            );
            if room_members.is_empty() {
                index.remove(room);
                true
            } else {
                false
            }
        };

        if !emptied {
            return Ok(());
        }

        let closed = match subscriptions.get(room) {
            Some(subscription) => subscription.close(&*self.broker).await,
            None => return Ok(()),
        };

        match closed {
            Ok(()) => {
                subscriptions.remove(room);
                info!("Unsubscribed from broker channel for room {}", room);
                Ok(())
            }
            Err(e) => {
                warn!("Keeping subscription for empty room {}: {}", room, e);
                Err(e)
            }
        }
    }

    /// Retry the unsubscribe of rooms whose subscription outlived their members.
    ///
    /// Returns the number of subscriptions released.
    pub async fn release_dangling(&self) -> usize {
        let mut subscriptions = self.subscriptions.lock().await;

        let dangling: Vec<String> = {
            let index = self.index_read();
            subscriptions
                .keys()
                .filter(|room| !index.contains_key(room.as_str()))
                .cloned()
                .collect()
        };

        let mut released = 0;
        for room in dangling {
            let closed = match subscriptions.get(&room) {
                Some(subscription) => subscription.close(&*self.broker).await,
                None => continue,
            };
            match closed {
                Ok(()) => {
                    subscriptions.remove(&room);
                    info!("Released dangling subscription for room {}", room);
                    released += 1;
                }
                Err(e) => warn!("Subscription for room {} still dangling: {}", room, e),
            }
        }
        released
    }

    pub fn is_member(&self, room: &str, connection_id: &str) -> bool {
        self.index_read()
            .get(room)
            .map(|members| members.contains_key(connection_id))
            .unwrap_or(false)
    }

    /// Every local member of a room
    pub fn members_of(&self, room: &str) -> Vec<Member> {
        self.relay.members_of(room)
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.index_read().get(room).map(HashMap::len).unwrap_or(0)
    }

    /// State of one room, `None` if the registry holds nothing for it
    pub async fn snapshot(&self, room: &str) -> Option<RoomSubscriptionState> {
        let subscriptions = self.subscriptions.lock().await;
        let member_count = self.member_count(room);
        let subscription = subscriptions.get(room);

        if subscription.is_none() && member_count == 0 {
            return None;
        }

        Some(RoomSubscriptionState {
            room: room.to_string(),
            member_count,
            subscribed: subscription.is_some(),
            subscribed_at: subscription.map(Subscription::subscribed_at),
        })
    }

    /// State of every room, sorted by name
    pub async fn rooms(&self) -> Vec<RoomSubscriptionState> {
        let subscriptions = self.subscriptions.lock().await;
        let index = self.index_read();

        let mut names: Vec<&String> = subscriptions.keys().chain(index.keys()).collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .map(|room| {
                let subscription = subscriptions.get(room);
                RoomSubscriptionState {
                    room: room.clone(),
                    member_count: index.get(room).map(HashMap::len).unwrap_or(0),
                    subscribed: subscription.is_some(),
                    subscribed_at: subscription.map(Subscription::subscribed_at),
                }
            })
            .collect()
    }
}
