//! Operator-visible record of deliveries a consumer could not process
//!
//! The runtime never drops a failed event: it stays unacknowledged and is
//! redelivered. Every failed attempt is also handed to a `FailureSink` so
//! that stuck roles are visible without grepping logs.

use crate::error::Result;
use crate::types::{Event, ReceivedEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One failed processing attempt
#[derive(Debug, Clone)]
pub struct FailedDelivery {
    /// Consumer role that failed
    pub role: String,

    /// Queue the delivery came from
    pub queue: String,

    /// Broker-assigned sequence number
    pub sequence: u64,

    /// Delivery attempt that failed
    pub num_delivered: u64,

    /// Decoded event, absent when the body could not be decoded
    pub event: Option<Event>,

    /// Why processing failed
    pub reason: String,

    /// Unix timestamp in milliseconds
    pub failed_at: u64,
}

impl FailedDelivery {
    /// A handler failure on a decoded event
    pub fn handler(
        role: impl Into<String>,
        received: &ReceivedEvent,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            queue: received.queue.clone(),
            sequence: received.sequence,
            num_delivered: received.num_delivered,
            event: Some(received.event.clone()),
            reason: reason.into(),
            failed_at: now_millis(),
        }
    }

    /// A message whose body is not a valid event
    pub fn undecodable(
        role: impl Into<String>,
        queue: impl Into<String>,
        sequence: u64,
        num_delivered: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            queue: queue.into(),
            sequence,
            num_delivered,
            event: None,
            reason: reason.into(),
            failed_at: now_millis(),
        }
    }
}

/// Trait for failure sinks
#[async_trait]
pub trait FailureSink: Send + Sync {
    /// Record a failed attempt
    async fn record(&self, failure: FailedDelivery) -> Result<()>;

    /// Number of failures currently held
    async fn count(&self) -> Result<usize>;

    /// Most recent failures, newest first
    async fn list(&self, limit: usize) -> Result<Vec<FailedDelivery>>;
}

/// Bounded in-memory failure sink
///
/// Keeps the newest `max_failures` entries; older ones are drained.
pub struct MemoryFailureSink {
    failures: Arc<RwLock<Vec<FailedDelivery>>>,
    max_failures: usize,
}

impl MemoryFailureSink {
    pub fn new(max_failures: usize) -> Self {
        Self {
            failures: Arc::new(RwLock::new(Vec::new())),
            max_failures,
        }
    }
}

impl Default for MemoryFailureSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl FailureSink for MemoryFailureSink {
    async fn record(&self, failure: FailedDelivery) -> Result<()> {
        let mut failures = self.failures.write().await;
        failures.push(failure);

        if self.max_failures > 0 && failures.len() > self.max_failures {
            let drain_count = failures.len() - self.max_failures;
            failures.drain(..drain_count);
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.failures.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<FailedDelivery>> {
        let failures = self.failures.read().await;
        Ok(failures.iter().rev().take(limit).cloned().collect())
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;

    fn received(num_delivered: u64) -> ReceivedEvent {
        ReceivedEvent {
            event: Event::new("purchase", "bob456", Payload::new()),
            queue: "cache_queue".to_string(),
            sequence: 7,
            num_delivered,
        }
    }

    #[test]
    fn test_handler_failure_carries_context() {
        let failure = FailedDelivery::handler("cache", &received(3), "backend down");
        assert_eq!(failure.role, "cache");
        assert_eq!(failure.queue, "cache_queue");
        assert_eq!(failure.sequence, 7);
        assert_eq!(failure.num_delivered, 3);
        assert_eq!(failure.event.unwrap().subject_id(), "bob456");
        assert!(failure.failed_at > 0);
    }

    #[test]
    fn test_undecodable_has_no_event() {
        let failure = FailedDelivery::undecodable("audit", "audit_queue", 1, 1, "bad json");
        assert!(failure.event.is_none());
    }

    #[tokio::test]
    async fn test_memory_sink_list_newest_first() {
        let sink = MemoryFailureSink::default();
        for i in 0..5 {
            sink.record(FailedDelivery::handler("cache", &received(1), format!("reason {}", i)))
                .await
                .unwrap();
        }

        assert_eq!(sink.count().await.unwrap(), 5);
        let list = sink.list(3).await.unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].reason, "reason 4");
        assert_eq!(list[2].reason, "reason 2");
    }

    #[tokio::test]
    async fn test_memory_sink_max_capacity() {
        let sink = MemoryFailureSink::new(2);
        for i in 0..4 {
            sink.record(FailedDelivery::handler("cache", &received(1), format!("reason {}", i)))
                .await
                .unwrap();
        }

        assert_eq!(sink.count().await.unwrap(), 2);
        assert_eq!(sink.list(10).await.unwrap()[1].reason, "reason 2");
    }
}
