//! Redis-backed broker
//!
//! Two multiplexed connections serve every room. One publishes; the other
//! carries all subscriptions, with messages arriving as RESP3 push frames
//! that a single dispatcher task routes to the room's delivery callback.
//! RESP3 pushes need Redis 6 or newer.

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use redis::aio::MultiplexedConnection;
use redis::{
    AsyncCommands, AsyncConnectionConfig, Client, IntoConnectionInfo, ProtocolVersion, PushInfo, PushKind,
    Value,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::traits::{Broker, DeliveryCallback};
use crate::error::{RedchatError, Result};

type Callbacks = Arc<RwLock<HashMap<String, DeliveryCallback>>>;

pub struct RedisBroker {
    publisher: MultiplexedConnection,
    subscriber: MultiplexedConnection,
    callbacks: Callbacks,
    dispatcher: JoinHandle<()>,
}

impl RedisBroker {
    /// Open the publishing and subscribing connections
    pub async fn connect(redis_url: &str) -> Result<Self> {
        // The URL may carry credentials, keep it out of errors and logs
        let mut info = redis_url
            .into_connection_info()
            .map_err(|e| RedchatError::ConfigError(format!("Invalid Redis URL: {}", e)))?;
        info.redis.protocol = ProtocolVersion::RESP3;

        let client = Client::open(info)
            .map_err(|e| RedchatError::ConfigError(format!("Invalid Redis URL: {}", e)))?;

        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedchatError::ConfigError(format!("Failed to connect to Redis: {}", e)))?;

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let config = AsyncConnectionConfig::new().set_push_sender(push_tx);
        let subscriber = client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| RedchatError::ConfigError(format!("Failed to open Redis subscriber: {}", e)))?;

        let callbacks: Callbacks = Arc::new(RwLock::new(HashMap::new()));
        let dispatcher = tokio::spawn(dispatch_pushes(push_rx, callbacks.clone()));

        info!("Connected to Redis broker");

        Ok(Self {
            publisher,
            subscriber,
            callbacks,
            dispatcher,
        })
    }

    fn callbacks_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, DeliveryCallback>> {
        self.callbacks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RedisBroker {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch_pushes(mut pushes: mpsc::UnboundedReceiver<PushInfo>, callbacks: Callbacks) {
    while let Some(push) = pushes.recv().await {
        match push.kind {
            PushKind::Message => {
                deliver_push(&callbacks, push.data);
            }
            PushKind::Disconnection => {
                warn!("Redis subscriber connection closed, room deliveries stopped");
            }
            other => trace!("Ignoring Redis push {:?}", other),
        }
    }
    debug!("Redis push dispatcher stopped");
}

/// Route one `message` push (`[channel, payload]`) to its room's callback.
/// Returns whether a callback ran.
fn deliver_push(callbacks: &Callbacks, data: Vec<Value>) -> bool {
    let mut data = data.into_iter();
    let (Some(channel), Some(payload)) = (data.next(), data.next()) else {
        warn!("Dropping malformed Redis message push");
        return false;
    };

    let room: String = match redis::from_owned_redis_value(channel) {
        Ok(room) => room,
        Err(e) => {
            warn!("Dropping Redis message with unreadable channel: {}", e);
            return false;
        }
    };
    let payload: String = match redis::from_owned_redis_value(payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Dropping non-text payload on room {}: {}", room, e);
            return false;
        }
    };

    let callback = callbacks
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&room)
        .cloned();
    match callback {
        Some(callback) => {
            callback(&room, &payload);
            true
        }
        None => {
            trace!("No local subscription for room {}, dropping message", room);
            false
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, room: &str, payload: String) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(room, payload)
            .await
            .map_err(|e| RedchatError::PublishFailed {
                room: room.to_string(),
                reason: e.to_string(),
            })?;
        trace!("Published to room {} ({} subscribers)", room, receivers);
        Ok(())
    }

    async fn subscribe(&self, room: &str, on_message: DeliveryCallback) -> Result<()> {
        let subscribe_failed = |reason: String| RedchatError::SubscribeFailed {
            room: room.to_string(),
            reason,
        };

        match self.callbacks_write().entry(room.to_string()) {
            Entry::Occupied(_) => return Err(subscribe_failed("already subscribed".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(on_message);
            }
        }

        let mut conn = self.subscriber.clone();
        if let Err(e) = conn.subscribe(room).await {
            self.callbacks_write().remove(room);
            return Err(subscribe_failed(e.to_string()));
        }
        Ok(())
    }

    async fn unsubscribe(&self, room: &str) -> Result<()> {
        let unsubscribe_failed = |reason: String| RedchatError::UnsubscribeFailed {
            room: room.to_string(),
            reason,
        };

        if !self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(room)
        {
            return Err(unsubscribe_failed("not subscribed".to_string()));
        }

        // The callback stays registered until Redis confirms
        let mut conn = self.subscriber.clone();
        conn.unsubscribe(room)
            .await
            .map_err(|e| unsubscribe_failed(e.to_string()))?;
        self.callbacks_write().remove(room);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_callbacks(room: &str) -> (Callbacks, Arc<Mutex<Vec<(String, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: DeliveryCallback = Arc::new(move |room: &str, payload: &str| {
            sink.lock().unwrap().push((room.to_string(), payload.to_string()));
        });
        let callbacks: Callbacks = Arc::new(RwLock::new(HashMap::new()));
        callbacks.write().unwrap().insert(room.to_string(), callback);
        (callbacks, seen)
    }

    fn bulk(text: &str) -> Value {
        Value::BulkString(text.as_bytes().to_vec())
    }

    #[test]
    fn test_message_push_reaches_room_callback() {
        let (callbacks, seen) = recording_callbacks("lobby");

        assert!(deliver_push(&callbacks, vec![bulk("lobby"), bulk("{\"text\":\"hi\"}")]));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("lobby".to_string(), "{\"text\":\"hi\"}".to_string())]
        );
    }

    #[test]
    fn test_push_for_unknown_room_is_dropped() {
        let (callbacks, seen) = recording_callbacks("lobby");

        assert!(!deliver_push(&callbacks, vec![bulk("elsewhere"), bulk("x")]));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_push_is_dropped() {
        let (callbacks, seen) = recording_callbacks("lobby");

        assert!(!deliver_push(&callbacks, vec![bulk("lobby")]));
        assert!(!deliver_push(&callbacks, vec![]));
        assert!(!deliver_push(&callbacks, vec![bulk("lobby"), Value::Array(vec![])]));
        assert!(seen.lock().unwrap().is_empty());
    }
}
