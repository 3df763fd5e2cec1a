//! Abstract broker interface

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

/// Invoked once per broker-delivered message with `(room, raw_payload)`
pub type DeliveryCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Pub/sub capability backing room fan-out.
///
/// Topics are room names passed through unchanged. An adapter keeps at most
/// one callback registration per room and rejects a second `subscribe` for
/// a room it is already listening on.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to every subscriber of `room`, this process included
    async fn publish(&self, room: &str, payload: String) -> Result<()>;

    /// Start delivering messages for `room` to `on_message`
    async fn subscribe(&self, room: &str, on_message: DeliveryCallback) -> Result<()>;

    /// Stop delivering messages for `room`
    async fn unsubscribe(&self, room: &str) -> Result<()>;
}

pub type SharedBroker = Arc<dyn Broker>;
