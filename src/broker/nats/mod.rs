//! NATS JetStream broker
//!
//! Implements `Broker` using NATS JetStream streams as broadcast channels
//! and durable pull consumers as subscription queues.

mod client;
mod config;
mod subscriber;

pub use client::NatsClient;
pub use config::NatsConfig;
pub use subscriber::NatsSubscription;

use crate::broker::{Broker, BrokerInfo, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// NATS JetStream broker
///
/// Wraps `NatsClient` and implements the `Broker` trait.
pub struct NatsBroker {
    client: NatsClient,
}

impl NatsBroker {
    /// Connect to NATS
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn declare_channel(&self, name: &str, durable: bool) -> Result<()> {
        self.client.declare_channel(name, durable).await
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<()> {
        self.client.declare_queue(name, durable).await
    }

    async fn bind(&self, queue: &str, channel: &str) -> Result<()> {
        self.client.bind(queue, channel).await
    }

    async fn publish(&self, channel: &str, body: Bytes, durable: bool) -> Result<u64> {
        self.client.publish(channel, body, durable).await
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>> {
        let sub = self.client.subscribe(queue).await?;
        Ok(Box::new(sub))
    }

    async fn info(&self) -> Result<BrokerInfo> {
        self.client.info().await
    }

    fn name(&self) -> &str {
        "nats"
    }
}
