//! NATS JetStream broker configuration

use async_nats::jetstream::consumer::{pull, AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{self, DiscardPolicy, RetentionPolicy, StorageType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a transient queue's consumer survives without a subscriber
pub const TRANSIENT_QUEUE_IDLE: Duration = Duration::from_secs(300);

/// Connection and stream settings for the NATS broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsConfig {
    /// Server URL (e.g., `nats://127.0.0.1:4222`)
    pub url: String,

    /// Prefix for channel subjects; channel `user_actions` publishes to
    /// `<subject_prefix>.user_actions`
    pub subject_prefix: String,

    /// Optional auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,

    /// Per-stream message cap (-1 for unlimited); once reached, publishes
    /// are rejected instead of evicting undelivered messages
    pub max_messages: i64,

    /// Per-stream age limit in seconds (0 for unlimited)
    pub max_age_secs: u64,

    /// Per-stream byte cap (-1 for unlimited)
    pub max_bytes: i64,

    /// How long a delivery may stay unacknowledged before JetStream
    /// redelivers it; must cover the slowest handler plus retry backoff
    pub ack_wait_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            subject_prefix: "broadcast".to_string(),
            token: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            max_messages: -1,
            max_age_secs: 0,
            max_bytes: -1,
            ack_wait_secs: 3600,
        }
    }
}

impl NatsConfig {
    /// Subject a channel publishes to
    pub fn channel_subject(&self, channel: &str) -> String {
        format!("{}.{}", self.subject_prefix, channel)
    }

    /// JetStream stream name backing a channel
    ///
    /// Stream names may not contain `.`, `*`, `>` or whitespace, so
    /// anything outside `[A-Za-z0-9_-]` becomes `_`.
    pub fn stream_name(&self, channel: &str) -> String {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        format!("{}_{}", sanitize(&self.subject_prefix), sanitize(channel))
    }

    /// Stream settings backing a channel
    ///
    /// Interest retention keeps a message until every consumer bound at
    /// publish time has acknowledged it, and the stream limits reject new
    /// publishes rather than discard messages a queue has not consumed.
    pub fn stream_config(&self, channel: &str, durable: bool) -> stream::Config {
        stream::Config {
            name: self.stream_name(channel),
            subjects: vec![self.channel_subject(channel)],
            storage: if durable {
                StorageType::File
            } else {
                StorageType::Memory
            },
            retention: RetentionPolicy::Interest,
            discard: DiscardPolicy::New,
            max_messages: self.max_messages,
            max_age: Duration::from_secs(self.max_age_secs),
            max_bytes: self.max_bytes,
            ..Default::default()
        }
    }

    /// Pull consumer settings for a queue bound to a channel
    ///
    /// One message in flight at a time keeps each queue in publish order
    /// across naks and redeliveries.
    pub fn consumer_config(&self, queue: &str, channel: &str, durable: bool) -> pull::Config {
        pull::Config {
            durable_name: Some(queue.to_string()),
            filter_subject: self.channel_subject(channel),
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.ack_wait_secs),
            max_ack_pending: 1,
            deliver_policy: DeliverPolicy::New,
            inactive_threshold: if durable {
                Duration::ZERO
            } else {
                TRANSIENT_QUEUE_IDLE
            },
            ..Default::default()
        }
    }
}
