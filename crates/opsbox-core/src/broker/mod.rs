//! Device queues on the message broker: command sending, data queue
//! monitoring and queue inspection.

pub mod amqp;
pub mod commands;
pub mod console;
pub mod management;
pub mod memory;
pub mod messages;
pub mod queues;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;

pub use amqp::AmqpBroker;
pub use commands::{send_command, send_command_set, CommandMessage, CommandSet, DeviceCommand};
pub use console::QueueConsole;
pub use management::ManagementApi;
pub use memory::MemoryBroker;
pub use queues::QueueFilter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueueStats {
    pub name: String,
    #[serde(default)]
    pub messages: u32,
    #[serde(default)]
    pub consumers: u32,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
}

/// A message fetched without acknowledgement. It stays owned by the
/// broker until [`Broker::ack`] or [`Broker::requeue`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Passive declare; `None` when the queue does not exist.
    async fn queue_stats(&self, queue: &str) -> Result<Option<QueueStats>>;

    async fn declare_durable(&self, queue: &str) -> Result<QueueStats>;

    /// Persistent JSON message on the default exchange, routed by queue name.
    async fn publish_json(&self, queue: &str, body: &[u8]) -> Result<()>;

    async fn get(&self, queue: &str) -> Result<Option<Delivery>>;

    async fn ack(&self, tag: u64) -> Result<()>;

    async fn requeue(&self, tag: u64) -> Result<()>;

    /// Returns the number of messages removed.
    async fn purge(&self, queue: &str) -> Result<u32>;

    /// Next message from a consumer on `queue`; `None` when the consumer
    /// ends. The consumer is registered on first use.
    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Cancels the consumer started by [`Broker::next_delivery`]. Messages
    /// it received but nobody acknowledged go back to their queue.
    async fn stop_consuming(&self) -> Result<()>;
}
