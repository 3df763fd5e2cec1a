//! In-process broker for single-node deployments and tests
//!
//! A [`MemoryBus`] stands in for the external pub/sub service: it owns one
//! broadcast channel per topic. Each [`MemoryBroker`] is one process's
//! adapter onto a bus, so several registries sharing a bus behave like
//! several servers sharing a Redis instance.

use async_trait::async_trait;
use log::{debug, trace, warn};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::traits::{Broker, DeliveryCallback};
use crate::constants::MEMORY_BUS_CAPACITY;
use crate::error::{RedchatError, Result};

/// Shared topic table, the in-process equivalent of a broker server
pub struct MemoryBus {
    topics: RwLock<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(MEMORY_BUS_CAPACITY)
    }

    /// Slow listeners that fall more than `capacity` messages behind skip ahead
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        })
    }

    /// Send a payload to the topic's current listeners, returning how many there were
    pub fn publish(&self, topic: &str, payload: String) -> Result<usize> {
        let mut topics = self.topics.write()?;
        let receivers = match topics.get(topic) {
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => 0,
        };
        if receivers == 0 {
            // Nobody listens any more, forget the topic
            topics.remove(topic);
        }
        Ok(receivers)
    }

    pub fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<String>> {
        let mut topics = self.topics.write()?;
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.subscribe())
    }

    /// Forget a topic once nobody listens to it. Returns whether it was removed.
    pub fn release(&self, topic: &str) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        match topics.get(topic) {
            Some(sender) if sender.receiver_count() == 0 => {
                topics.remove(topic);
                true
            }
            _ => false,
        }
    }

    /// Number of topics that currently have a channel
    pub fn topic_count(&self) -> usize {
        self.topics.read().map(|topics| topics.len()).unwrap_or(0)
    }
}

/// Bus receiver that hands its topic back to the bus when dropped
struct TopicListener {
    bus: Arc<MemoryBus>,
    topic: String,
    receiver: Option<broadcast::Receiver<String>>,
}

impl TopicListener {
    async fn recv(&mut self) -> std::result::Result<String, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for TopicListener {
    fn drop(&mut self) {
        // The receiver must be gone before the bus counts listeners
        drop(self.receiver.take());
        if self.bus.release(&self.topic) {
            trace!("Released memory bus topic {}", self.topic);
        }
    }
}

/// One process's connection to a [`MemoryBus`]
pub struct MemoryBroker {
    bus: Arc<MemoryBus>,
    /// Room name to the task forwarding bus traffic into the delivery callback
    listeners: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl MemoryBroker {
    pub fn new(bus: Arc<MemoryBus>) -> Self {
        Self {
            bus,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Broker with a private bus, only useful inside a single process
    pub fn standalone() -> Self {
        Self::new(MemoryBus::new())
    }

    /// Rooms this adapter is currently listening on
    pub fn subscribed_rooms(&self) -> Vec<String> {
        self.listeners
            .lock()
            .map(|listeners| listeners.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            for (_, task) in listeners.drain() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, room: &str, payload: String) -> Result<()> {
        let receivers = self.bus.publish(room, payload).map_err(|e| RedchatError::PublishFailed {
            room: room.to_string(),
            reason: e.to_string(),
        })?;
        trace!("Published to room {} ({} listeners)", room, receivers);
        Ok(())
    }

    async fn subscribe(&self, room: &str, on_message: DeliveryCallback) -> Result<()> {
        let subscribe_failed = |reason: String| RedchatError::SubscribeFailed {
            room: room.to_string(),
            reason,
        };

        let mut listeners = self.listeners.lock().map_err(|e| subscribe_failed(e.to_string()))?;
        let slot = match listeners.entry(room.to_string()) {
            Entry::Occupied(_) => return Err(subscribe_failed("already subscribed".to_string())),
            Entry::Vacant(slot) => slot,
        };

        let receiver = self.bus.subscribe(room).map_err(|e| subscribe_failed(e.to_string()))?;
        let mut listener = TopicListener {
            bus: self.bus.clone(),
            topic: room.to_string(),
            receiver: Some(receiver),
        };
        let task = tokio::spawn(async move {
            loop {
                let next = listener.recv().await;
                match next {
                    Ok(payload) => on_message(&listener.topic, &payload),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Listener for room {} lagged, skipped {} messages", listener.topic, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Memory bus listener for room {} stopped", listener.topic);
        });
        slot.insert(task);

        Ok(())
    }

    async fn unsubscribe(&self, room: &str) -> Result<()> {
        let task = self
            .listeners
            .lock()
            .map_err(|e| RedchatError::UnsubscribeFailed {
                room: room.to_string(),
                reason: e.to_string(),
            })?
            .remove(room);

        match task {
            Some(task) => {
                task.abort();
                // Wait for the listener to drop so the topic is released
                let _ = task.await;
                Ok(())
            }
            None => Err(RedchatError::UnsubscribeFailed {
                room: room.to_string(),
                reason: "not subscribed".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn forwarding_callback() -> (DeliveryCallback, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: DeliveryCallback = Arc::new(move |room: &str, payload: &str| {
            let _ = tx.send((room.to_string(), payload.to_string()));
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let broker = MemoryBroker::standalone();
        let (callback, mut rx) = forwarding_callback();

        broker.subscribe("lobby", callback).await.unwrap();
        broker.publish("lobby", "payload".to_string()).await.unwrap();

        let delivered = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(delivered, ("lobby".to_string(), "payload".to_string()));
    }

    #[tokio::test]
    async fn test_second_subscribe_for_same_room_is_rejected() {
        let broker = MemoryBroker::standalone();
        let (first, _rx1) = forwarding_callback();
        let (second, _rx2) = forwarding_callback();

        broker.subscribe("lobby", first).await.unwrap();
        let result = broker.subscribe("lobby", second).await;
        assert!(matches!(result, Err(RedchatError::SubscribeFailed { .. })));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MemoryBroker::standalone();
        let (callback, mut rx) = forwarding_callback();

        broker.subscribe("lobby", callback).await.unwrap();
        broker.unsubscribe("lobby").await.unwrap();
        broker.publish("lobby", "late".to_string()).await.unwrap();

        // The aborted task drops its callback, closing the channel
        let next = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(next.is_none());
        assert!(broker.subscribed_rooms().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_room_fails() {
        let broker = MemoryBroker::standalone();
        let result = broker.unsubscribe("nowhere").await;
        assert!(matches!(result, Err(RedchatError::UnsubscribeFailed { .. })));
    }

    #[tokio::test]
    async fn test_brokers_sharing_a_bus_both_receive() {
        let bus = MemoryBus::new();
        let first = MemoryBroker::new(bus.clone());
        let second = MemoryBroker::new(bus.clone());
        let (cb1, mut rx1) = forwarding_callback();
        let (cb2, mut rx2) = forwarding_callback();

        first.subscribe("lobby", cb1).await.unwrap();
        second.subscribe("lobby", cb2).await.unwrap();
        first.publish("lobby", "hello".to_string()).await.unwrap();

        let got1 = timeout(Duration::from_secs(1), rx1.recv()).await.unwrap().unwrap();
        let got2 = timeout(Duration::from_secs(1), rx2.recv()).await.unwrap().unwrap();
        assert_eq!(got1.1, "hello");
        assert_eq!(got2.1, "hello");
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_topics() {
        let broker = MemoryBroker::standalone();

        for i in 0..200 {
            let room = format!("room-{}", i);
            let (callback, _rx) = forwarding_callback();
            broker.subscribe(&room, callback).await.unwrap();
            broker.unsubscribe(&room).await.unwrap();
        }

        assert_eq!(broker.bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_topic_survives_until_last_listener_leaves() {
        let bus = MemoryBus::new();
        let first = MemoryBroker::new(bus.clone());
        let second = MemoryBroker::new(bus.clone());
        let (cb1, _rx1) = forwarding_callback();
        let (cb2, mut rx2) = forwarding_callback();

        first.subscribe("lobby", cb1).await.unwrap();
        second.subscribe("lobby", cb2).await.unwrap();

        first.unsubscribe("lobby").await.unwrap();
        assert_eq!(bus.topic_count(), 1);

        first.publish("lobby", "still open".to_string()).await.unwrap();
        let got = timeout(Duration::from_secs(1), rx2.recv()).await.unwrap().unwrap();
        assert_eq!(got.1, "still open");

        second.unsubscribe("lobby").await.unwrap();
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_publish_without_listeners_drops_topic() {
        let bus = MemoryBus::new();
        let receiver = bus.subscribe("lobby").unwrap();
        assert_eq!(bus.topic_count(), 1);

        drop(receiver);
        assert_eq!(bus.publish("lobby", "x".to_string()).unwrap(), 0);
        assert_eq!(bus.topic_count(), 0);
    }
}
