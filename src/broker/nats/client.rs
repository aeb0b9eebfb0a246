//! NATS JetStream client: declare, bind, publish, subscribe
//!
//! Each broadcast channel is a JetStream stream with interest retention.
//! Each subscription queue is a durable pull consumer on that stream; every
//! consumer sees every message, so binding a queue is just creating its
//! consumer, and a message leaves the stream once all bound queues ack it.

use super::config::NatsConfig;
use super::subscriber::NatsSubscription;
use crate::broker::{BrokerInfo, QueueInfo, CONTENT_TYPE};
use crate::error::{BroadcastError, Result};
use async_nats::jetstream;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// NATS JetStream client
///
/// Low-level client for the channel/queue topology. Caches stream
/// handles for declared channels and the queue → channel bindings made
/// through this connection.
pub struct NatsClient {
    /// NATS client connection
    client: async_nats::Client,

    /// JetStream context
    jetstream: jetstream::Context,

    /// Declared channels (channel name → stream handle)
    channels: Mutex<HashMap<String, jetstream::stream::Stream>>,

    /// Declared queues (queue name → durable)
    queues: Mutex<HashMap<String, bool>>,

    /// Queue → channel bindings
    bindings: Mutex<HashMap<String, String>>,

    /// Configuration
    config: Arc<NatsConfig>,
}

impl NatsClient {
    /// Connect to NATS
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| BroadcastError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            channels: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
            config: Arc::new(config),
        })
    }

    /// Ensure the stream behind a channel exists with matching storage
    /// and retention
    pub async fn declare_channel(&self, name: &str, durable: bool) -> Result<()> {
        let stream_config = self.config.stream_config(name, durable);
        let stream_name = stream_config.name.clone();
        let storage = stream_config.storage;
        let retention = stream_config.retention;

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| {
                BroadcastError::Broker(format!(
                    "Failed to create/get stream '{}': {}",
                    stream_name, e
                ))
            })?;

        let existing = &stream.cached_info().config;
        if existing.storage != storage || existing.retention != retention {
            return Err(BroadcastError::DeclareConflict {
                name: name.to_string(),
                reason: format!(
                    "stream '{}' exists with storage {:?} and retention {:?}, \
                     requested {:?} and {:?}",
                    stream_name, existing.storage, existing.retention, storage, retention
                ),
            });
        }

        self.channels.lock().await.insert(name.to_string(), stream);

        tracing::info!(
            channel = name,
            stream = %stream_name,
            durable,
            "JetStream channel ready"
        );
        Ok(())
    }

    /// Record a queue declaration; the consumer itself is created on bind
    pub async fn declare_queue(&self, name: &str, durable: bool) -> Result<()> {
        let mut queues = self.queues.lock().await;
        match queues.get(name) {
            Some(existing) if *existing != durable => Err(BroadcastError::DeclareConflict {
                name: name.to_string(),
                reason: format!(
                    "queue exists with durable={}, requested durable={}",
                    existing, durable
                ),
            }),
            Some(_) => Ok(()),
            None => {
                queues.insert(name.to_string(), durable);
                Ok(())
            }
        }
    }

    /// Create (or reconfirm) the durable consumer for a queue
    pub async fn bind(&self, queue: &str, channel: &str) -> Result<()> {
        let durable = *self
            .queues
            .lock()
            .await
            .get(queue)
            .ok_or_else(|| BroadcastError::QueueNotFound(queue.to_string()))?;

        let channels = self.channels.lock().await;
        let stream = channels
            .get(channel)
            .ok_or_else(|| BroadcastError::ChannelNotFound(channel.to_string()))?;

        let config = self.config.consumer_config(queue, channel, durable);

        stream
            .get_or_create_consumer(queue, config)
            .await
            .map_err(|e| {
                BroadcastError::Broker(format!(
                    "Failed to create durable consumer '{}': {}",
                    queue, e
                ))
            })?;
        drop(channels);

        self.bindings
            .lock()
            .await
            .insert(queue.to_string(), channel.to_string());

        tracing::info!(queue, channel, "Queue bound");
        Ok(())
    }

    /// Publish a message to a channel, returning the JetStream sequence number
    ///
    /// JetStream persistence is a property of the stream, so the per-message
    /// `durable` flag only matters for transient channels, which are kept in
    /// memory storage regardless.
    pub async fn publish(&self, channel: &str, body: Bytes, durable: bool) -> Result<u64> {
        self.ensure_known_channel(channel).await?;

        let subject = self.config.channel_subject(channel);
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Content-Type", CONTENT_TYPE);

        let ack = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, body)
            .await
            .map_err(|e| BroadcastError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| BroadcastError::Publish {
                channel: channel.to_string(),
                reason: format!("ack failed: {}", e),
            })?;

        tracing::debug!(
            channel,
            subject = %subject,
            sequence = ack.sequence,
            durable,
            "Message published"
        );

        Ok(ack.sequence)
    }

    /// Open a pull subscription on a bound queue
    pub async fn subscribe(&self, queue: &str) -> Result<NatsSubscription> {
        let channel = self
            .bindings
            .lock()
            .await
            .get(queue)
            .cloned()
            .ok_or_else(|| BroadcastError::QueueNotFound(queue.to_string()))?;

        let channels = self.channels.lock().await;
        let stream = channels
            .get(&channel)
            .ok_or_else(|| BroadcastError::ChannelNotFound(channel.clone()))?;

        let consumer: jetstream::consumer::Consumer<jetstream::consumer::pull::Config> = stream
            .get_consumer(queue)
            .await
            .map_err(|e| BroadcastError::Subscribe {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let messages = consumer.messages().await.map_err(|e| BroadcastError::Subscribe {
            queue: queue.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(queue, channel = %channel, "Subscription opened");
        Ok(NatsSubscription::new(messages, queue))
    }

    /// Stream and consumer state for every channel declared on this connection
    pub async fn info(&self) -> Result<BrokerInfo> {
        let channels = self.channels.lock().await;
        let bindings = self.bindings.lock().await.clone();

        let mut queues = Vec::new();
        for (queue, channel) in &bindings {
            let Some(stream) = channels.get(channel) else {
                continue;
            };
            let info = stream.consumer_info(queue).await.map_err(|e| {
                BroadcastError::Broker(format!("Failed to get consumer info '{}': {}", queue, e))
            })?;
            queues.push(QueueInfo {
                name: queue.clone(),
                ready: info.num_pending,
                unacked: info.num_ack_pending as u64,
            });
        }
        queues.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(BrokerInfo {
            broker: "nats".to_string(),
            channels: channels.len(),
            queues,
        })
    }

    /// Get the underlying NATS client
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Look up a channel declared by another connection
    async fn ensure_known_channel(&self, channel: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if channels.contains_key(channel) {
            return Ok(());
        }

        let stream = self
            .jetstream
            .get_stream(self.config.stream_name(channel))
            .await
            .map_err(|_| BroadcastError::ChannelNotFound(channel.to_string()))?;
        channels.insert(channel.to_string(), stream);
        Ok(())
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}
