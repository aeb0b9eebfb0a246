//! Broker trait: the boundary to the durable multicast transport
//!
//! A broker owns broadcast channels and durable subscription queues.
//! Publishing to a channel places one copy of the message on every queue
//! bound to it; each queue then delivers and acknowledges independently.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

pub mod memory;
pub mod nats;

/// Media type of every message body handed to a broker
pub const CONTENT_TYPE: &str = "application/json";

/// Core trait for broadcast transports
///
/// Declarations and bindings are idempotent: repeating a call with the
/// same parameters leaves the topology unchanged. Bindings are static for
/// the lifetime of a run.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a broadcast channel
    ///
    /// Fails with `DeclareConflict` if the channel already exists with a
    /// different durability.
    async fn declare_channel(&self, name: &str, durable: bool) -> Result<()>;

    /// Declare a subscription queue
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<()>;

    /// Bind a queue to a channel so it receives every later publish
    async fn bind(&self, queue: &str, channel: &str) -> Result<()>;

    /// Publish one message to every queue bound to `channel`
    ///
    /// Returns the broker-assigned sequence number once the channel has
    /// accepted the message. Does not wait for consumer acknowledgement.
    async fn publish(&self, channel: &str, body: Bytes, durable: bool) -> Result<u64>;

    /// Open a manual-ack subscription on a queue
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>>;

    /// Get broker status information
    async fn info(&self) -> Result<BrokerInfo>;

    /// Broker name (e.g., "memory", "nats")
    fn name(&self) -> &str;

    /// Health check: returns true if the broker is reachable
    ///
    /// Default implementation delegates to `info()`.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Async manual-ack subscription on a single queue
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery
    ///
    /// Returns `Ok(None)` when the underlying stream has ended; callers
    /// treat that like a dropped connection.
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

type SettleFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A message delivered from a queue, pending acknowledgement
///
/// Dropping a delivery without settling it leaves it unacknowledged; the
/// broker redelivers it once the owning subscription goes away.
pub struct Delivery {
    /// Raw message body
    pub body: Bytes,

    /// Queue the message came from
    pub queue: String,

    /// Broker-assigned sequence number
    pub sequence: u64,

    /// Number of delivery attempts, including this one
    pub num_delivered: u64,

    ack_fn: SettleFn,

    nak_fn: SettleFn,
}

impl Delivery {
    /// Create a new delivery with ack/nak callbacks
    pub fn new(
        body: Bytes,
        queue: impl Into<String>,
        sequence: u64,
        num_delivered: u64,
        ack_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
        nak_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            body,
            queue: queue.into(),
            sequence,
            num_delivered,
            ack_fn: Box::new(ack_fn),
            nak_fn: Box::new(nak_fn),
        }
    }

    /// Acknowledge successful processing; removes the message from this queue only
    pub async fn ack(self) -> Result<()> {
        (self.ack_fn)().await
    }

    /// Negative-acknowledge (request redelivery)
    pub async fn nak(self) -> Result<()> {
        (self.nak_fn)().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("sequence", &self.sequence)
            .field("num_delivered", &self.num_delivered)
            .field("len", &self.body.len())
            .finish()
    }
}

/// Broker status information
#[derive(Debug, Clone)]
pub struct BrokerInfo {
    /// Broker name
    pub broker: String,
    /// Number of declared channels
    pub channels: usize,
    /// Per-queue depth
    pub queues: Vec<QueueInfo>,
}

/// Depth of a single queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    /// Messages waiting to be delivered
    pub ready: u64,
    /// Messages delivered but not yet acknowledged
    pub unacked: u64,
}

impl BrokerInfo {
    /// Look up a queue by name
    pub fn queue(&self, name: &str) -> Option<&QueueInfo> {
        self.queues.iter().find(|q| q.name == name)
    }
}
