// Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use redchat::broker::{Broker, DeliveryCallback};
use redchat::core::{Connection, Member, ServerMessage};
use redchat::error::{RedchatError, Result};

/// Broker double that records every call and delivers publishes inline,
/// the way a real broker echoes a message back to its own subscriber.
#[derive(Default)]
pub struct RecordingBroker {
    callbacks: Mutex<HashMap<String, DeliveryCallback>>,
    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, String)>>,
    fail_subscribe: AtomicBool,
    fail_unsubscribe: AtomicBool,
    fail_publish: AtomicBool,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn subscribe_count(&self, room: &str) -> usize {
        self.subscribe_calls.lock().unwrap().iter().filter(|r| *r == room).count()
    }

    pub fn unsubscribe_count(&self, room: &str) -> usize {
        self.unsubscribe_calls.lock().unwrap().iter().filter(|r| *r == room).count()
    }

    pub fn is_subscribed(&self, room: &str) -> bool {
        self.callbacks.lock().unwrap().contains_key(room)
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    /// Deliver a raw payload as if it arrived from the broker
    pub fn inject(&self, room: &str, raw: &str) -> bool {
        let callback = self.callbacks.lock().unwrap().get(room).cloned();
        match callback {
            Some(callback) => {
                callback(room, raw);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, room: &str, payload: String) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(RedchatError::PublishFailed {
                room: room.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.published
            .lock()
            .unwrap()
            .push((room.to_string(), payload.clone()));
        self.inject(room, &payload);
        Ok(())
    }

    async fn subscribe(&self, room: &str, on_message: DeliveryCallback) -> Result<()> {
        self.subscribe_calls.lock().unwrap().push(room.to_string());
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(RedchatError::SubscribeFailed {
                room: room.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let mut callbacks = self.callbacks.lock().unwrap();
        if callbacks.contains_key(room) {
            return Err(RedchatError::SubscribeFailed {
                room: room.to_string(),
                reason: "already subscribed".to_string(),
            });
        }
        callbacks.insert(room.to_string(), on_message);
        Ok(())
    }

    async fn unsubscribe(&self, room: &str) -> Result<()> {
        self.unsubscribe_calls.lock().unwrap().push(room.to_string());
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(RedchatError::UnsubscribeFailed {
                room: room.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        match self.callbacks.lock().unwrap().remove(room) {
            Some(_) => Ok(()),
            None => Err(RedchatError::UnsubscribeFailed {
                room: room.to_string(),
                reason: "not subscribed".to_string(),
            }),
        }
    }
}

/// A registry member with the receiving end of its outbound queue
pub fn member(id: &str) -> (Member, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = Connection::with_id(id.to_string(), tx);
    (connection.as_member(), rx)
}

/// Drain everything currently queued
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn chat(room: &str, text: &str, name: &str, sender_id: &str) -> ServerMessage {
    ServerMessage::ChatMessage {
        room: room.to_string(),
        text: text.to_string(),
        sender_display_name: name.to_string(),
        sender_id: sender_id.to_string(),
    }
}
