//! Publish/subscribe brokers used to fan room traffic out across processes
//!
//! The room registry talks to a broker only through the [`Broker`] trait.
//! Two backends are provided: an in-process memory bus and Redis.

pub mod memory;
pub mod redis_pubsub;
pub mod traits;

pub use memory::{MemoryBroker, MemoryBus};
pub use redis_pubsub::RedisBroker;
pub use traits::{Broker, DeliveryCallback, SharedBroker};
