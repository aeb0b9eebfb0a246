//! In-memory broker for testing and single-process use
//!
//! Models a fanout exchange with durable, manual-ack queues. Every queue
//! keeps its own copy of each message; acknowledging on one queue never
//! touches another. Unacked messages are requeued when the subscription
//! that received them is dropped, and `restart()` simulates a broker
//! restart so durability flags can be exercised without a real server.

use super::{Broker, BrokerInfo, Delivery, QueueInfo, Subscription};
use crate::error::{BroadcastError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// In-memory broadcast broker
///
/// Cheap to clone; clones share the same channels and queues, so a
/// publisher and several runtimes can each hold their own handle.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, ChannelState>,
    queues: HashMap<String, QueueState>,
    next_sequence: u64,
    next_tag: u64,
    next_consumer: u64,
    /// Bumped on every restart; deliveries and subscriptions from an
    /// older epoch are stale
    epoch: u64,
}

struct ChannelState {
    durable: bool,
    bindings: BTreeSet<String>,
}

struct QueueState {
    durable: bool,
    ready: VecDeque<Message>,
    unacked: HashMap<u64, Unacked>,
    notify: Arc<Notify>,
}

#[derive(Clone)]
struct Message {
    sequence: u64,
    body: Bytes,
    persistent: bool,
    delivered: u64,
}

struct Unacked {
    message: Message,
    consumer: u64,
}

fn lock(inner: &Mutex<Inner>) -> Result<MutexGuard<'_, Inner>> {
    inner
        .lock()
        .map_err(|e| BroadcastError::Broker(format!("Memory broker lock poisoned: {}", e)))
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a broker restart
    ///
    /// Transient channels and queues disappear along with their bindings.
    /// Durable queues keep their persistent messages; messages that were
    /// delivered but not acknowledged go back to the head of the queue in
    /// their original order. Open subscriptions fail on their next call.
    pub fn restart(&self) -> Result<()> {
        let mut guard = lock(&self.inner)?;
        let inner = &mut *guard;
        inner.epoch += 1;

        for queue in inner.queues.values() {
            queue.notify.notify_waiters();
        }

        inner.channels.retain(|_, c| c.durable);
        inner.queues.retain(|_, q| q.durable);

        let queues = &inner.queues;
        for channel in inner.channels.values_mut() {
            channel.bindings.retain(|q| queues.contains_key(q));
        }

        for queue in inner.queues.values_mut() {
            let mut requeued: Vec<Message> =
                queue.unacked.drain().map(|(_, u)| u.message).collect();
            requeued.sort_by_key(|m| m.sequence);
            let ready = std::mem::take(&mut queue.ready);
            queue.ready = requeued
                .into_iter()
                .chain(ready)
                .filter(|m| m.persistent)
                .collect();
        }

        tracing::info!(epoch = inner.epoch, "Memory broker restarted");
        Ok(())
    }

    /// Queues currently bound to a channel, in name order
    pub fn bindings(&self, channel: &str) -> Result<Vec<String>> {
        let inner = lock(&self.inner)?;
        let channel = inner
            .channels
            .get(channel)
            .ok_or_else(|| BroadcastError::ChannelNotFound(channel.to_string()))?;
        Ok(channel.bindings.iter().cloned().collect())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_channel(&self, name: &str, durable: bool) -> Result<()> {
        let mut inner = lock(&self.inner)?;
        match inner.channels.get(name) {
            Some(existing) if existing.durable != durable => Err(BroadcastError::DeclareConflict {
                name: name.to_string(),
                reason: format!(
                    "channel exists with durable={}, requested durable={}",
                    existing.durable, durable
                ),
            }),
            Some(_) => Ok(()),
            None => {
                inner.channels.insert(
                    name.to_string(),
                    ChannelState {
                        durable,
                        bindings: BTreeSet::new(),
                    },
                );
                tracing::info!(channel = name, durable, "Channel declared");
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<()> {
        let mut inner = lock(&self.inner)?;
        match inner.queues.get(name) {
            Some(existing) if existing.durable != durable => Err(BroadcastError::DeclareConflict {
                name: name.to_string(),
                reason: format!(
                    "queue exists with durable={}, requested durable={}",
                    existing.durable, durable
                ),
            }),
            Some(_) => Ok(()),
            None => {
                inner.queues.insert(
                    name.to_string(),
                    QueueState {
                        durable,
                        ready: VecDeque::new(),
                        unacked: HashMap::new(),
                        notify: Arc::new(Notify::new()),
                    },
                );
                tracing::info!(queue = name, durable, "Queue declared");
                Ok(())
            }
        }
    }

    async fn bind(&self, queue: &str, channel: &str) -> Result<()> {
        let mut guard = lock(&self.inner)?;
        let inner = &mut *guard;
        if !inner.queues.contains_key(queue) {
            return Err(BroadcastError::QueueNotFound(queue.to_string()));
        }
        let state = inner
            .channels
            .get_mut(channel)
            .ok_or_else(|| BroadcastError::ChannelNotFound(channel.to_string()))?;

        if state.bindings.insert(queue.to_string()) {
            tracing::info!(queue, channel, "Queue bound");
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, body: Bytes, durable: bool) -> Result<u64> {
        let mut guard = lock(&self.inner)?;
        let inner = &mut *guard;
        let state = inner
            .channels
            .get(channel)
            .ok_or_else(|| BroadcastError::ChannelNotFound(channel.to_string()))?;

        inner.next_sequence += 1;
        let sequence = inner.next_sequence;

        for name in &state.bindings {
            if let Some(queue) = inner.queues.get_mut(name) {
                queue.ready.push_back(Message {
                    sequence,
                    body: body.clone(),
                    persistent: durable,
                    delivered: 0,
                });
                queue.notify.notify_one();
            }
        }

        tracing::debug!(
            channel,
            sequence,
            copies = state.bindings.len(),
            "Message published"
        );
        Ok(sequence)
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>> {
        let mut inner = lock(&self.inner)?;
        if !inner.queues.contains_key(queue) {
            return Err(BroadcastError::QueueNotFound(queue.to_string()));
        }
        inner.next_consumer += 1;

        tracing::info!(queue, consumer = inner.next_consumer, "Subscription opened");
        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            queue: queue.to_string(),
            consumer: inner.next_consumer,
            epoch: inner.epoch,
        }))
    }

    async fn info(&self) -> Result<BrokerInfo> {
        let inner = lock(&self.inner)?;
        let mut queues: Vec<QueueInfo> = inner
            .queues
            .iter()
            .map(|(name, q)| QueueInfo {
                name: name.clone(),
                ready: q.ready.len() as u64,
                unacked: q.unacked.len() as u64,
            })
            .collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(BrokerInfo {
            broker: "memory".to_string(),
            channels: inner.channels.len(),
            queues,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Manual-ack subscription on an in-memory queue
pub struct MemorySubscription {
    inner: Arc<Mutex<Inner>>,
    queue: String,
    consumer: u64,
    epoch: u64,
}

impl MemorySubscription {
    fn delivery(&self, tag: u64, message: Message) -> Delivery {
        let ack_inner = self.inner.clone();
        let nak_inner = self.inner.clone();
        let ack_queue = self.queue.clone();
        let nak_queue = self.queue.clone();
        let epoch = self.epoch;

        Delivery::new(
            message.body,
            self.queue.clone(),
            message.sequence,
            message.delivered,
            move || Box::pin(async move { settle(&ack_inner, &ack_queue, tag, epoch, false) }),
            move || Box::pin(async move { settle(&nak_inner, &nak_queue, tag, epoch, true) }),
        )
    }
}

impl MemorySubscription {
    fn check_epoch(&self, inner: &Inner) -> Result<()> {
        if inner.epoch != self.epoch {
            return Err(BroadcastError::Connection(format!(
                "broker restarted while subscribed to '{}'",
                self.queue
            )));
        }
        Ok(())
    }

    /// Wake-up handle of the subscribed queue
    fn waiter(&self) -> Result<Arc<Notify>> {
        let inner = lock(&self.inner)?;
        self.check_epoch(&inner)?;
        inner
            .queues
            .get(&self.queue)
            .map(|q| q.notify.clone())
            .ok_or_else(|| BroadcastError::QueueNotFound(self.queue.clone()))
    }

    /// Pop the next ready message, if any, moving it to unacked
    fn try_next(&self) -> Result<Option<Delivery>> {
        let mut guard = lock(&self.inner)?;
        self.check_epoch(&guard)?;
        let inner = &mut *guard;
        let queue = inner
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BroadcastError::QueueNotFound(self.queue.clone()))?;

        let Some(mut message) = queue.ready.pop_front() else {
            return Ok(None);
        };
        message.delivered += 1;
        inner.next_tag += 1;
        let tag = inner.next_tag;
        queue.unacked.insert(
            tag,
            Unacked {
                message: message.clone(),
                consumer: self.consumer,
            },
        );
        Ok(Some(self.delivery(tag, message)))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            // Register for wake-ups before looking at the queue, so a publish
            // or restart between the check and the wait is never missed
            let notify = self.waiter()?;
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_next()? {
                return Ok(Some(delivery));
            }
            notified.await;
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        if guard.epoch != self.epoch {
            return;
        }
        let Some(queue) = guard.queues.get_mut(&self.queue) else {
            return;
        };

        let mut tags: Vec<u64> = queue
            .unacked
            .iter()
            .filter(|(_, u)| u.consumer == self.consumer)
            .map(|(tag, _)| *tag)
            .collect();
        if tags.is_empty() {
            return;
        }

        let mut requeued: Vec<Message> = tags
            .drain(..)
            .filter_map(|tag| queue.unacked.remove(&tag))
            .map(|u| u.message)
            .collect();
        requeued.sort_by_key(|m| std::cmp::Reverse(m.sequence));
        let count = requeued.len();
        for message in requeued {
            queue.ready.push_front(message);
        }
        queue.notify.notify_one();

        tracing::debug!(
            queue = %self.queue,
            consumer = self.consumer,
            count,
            "Requeued unacked messages of closed subscription"
        );
    }
}

fn settle(inner: &Mutex<Inner>, queue: &str, tag: u64, epoch: u64, requeue: bool) -> Result<()> {
    let mut inner = lock(inner)?;
    if inner.epoch != epoch {
        return Err(BroadcastError::Ack(format!(
            "delivery {} on '{}' predates a broker restart",
            tag, queue
        )));
    }
    let state = inner
        .queues
        .get_mut(queue)
        .ok_or_else(|| BroadcastError::QueueNotFound(queue.to_string()))?;
    let unacked = state
        .unacked
        .remove(&tag)
        .ok_or_else(|| BroadcastError::Ack(format!("unknown delivery {} on '{}'", tag, queue)))?;

    if requeue {
        state.ready.push_front(unacked.message);
        state.notify.notify_one();
    }
    Ok(())
}
