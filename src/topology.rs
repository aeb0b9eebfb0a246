//! Static channel/queue topology
//!
//! Bindings are established once at setup. Every role declares the whole
//! topology it depends on, so publishers and subscribers can start in any
//! order; all calls are idempotent.

use crate::broker::Broker;
use crate::config::TopologyConfig;
use crate::error::Result;

/// A broadcast channel together with the queues bound to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    channel: String,
    durable: bool,
    queues: Vec<String>,
}

impl Topology {
    /// Start a durable topology for `channel` with no queues
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            durable: true,
            queues: Vec::new(),
        }
    }

    /// Add a queue binding
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        let queue = queue.into();
        if !self.queues.contains(&queue) {
            self.queues.push(queue);
        }
        self
    }

    /// Set durability of the channel and its queues
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Declare the channel, every queue, and every binding
    pub async fn setup(&self, broker: &dyn Broker) -> Result<()> {
        broker.declare_channel(&self.channel, self.durable).await?;
        for queue in &self.queues {
            bind_queue(broker, &self.channel, queue, self.durable).await?;
        }

        tracing::info!(
            channel = %self.channel,
            queues = ?self.queues,
            durable = self.durable,
            broker = broker.name(),
            "Topology ready"
        );
        Ok(())
    }
}

impl From<&TopologyConfig> for Topology {
    fn from(config: &TopologyConfig) -> Self {
        config
            .queues
            .iter()
            .fold(Topology::new(&config.channel), |t, q| t.with_queue(q))
            .durable(config.durable)
    }
}

/// Declare one queue and bind it; used by runtimes to (re)establish their
/// own subscription without touching other roles
pub async fn bind_queue(
    broker: &dyn Broker,
    channel: &str,
    queue: &str,
    durable: bool,
) -> Result<()> {
    broker.declare_channel(channel, durable).await?;
    broker.declare_queue(queue, durable).await?;
    broker.bind(queue, channel).await
}
