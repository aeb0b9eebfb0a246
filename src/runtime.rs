//! Subscriber runtime: drives one consumer policy from one queue
//!
//! The runtime binds its queue (idempotently declaring the channel too),
//! subscribes, and handles deliveries one at a time in queue order:
//!
//! - decoded and handled: acknowledged
//! - handler error: reported, then after the retry backoff handed back
//!   for redelivery (no ack)
//! - undecodable body: reported and acknowledged so it cannot block the queue
//!
//! A dropped subscription triggers reconnect-and-rebind with a bounded
//! number of attempts. Cancellation stops the runtime from pulling new
//! deliveries; a delivery already received is always settled first.

use crate::broker::{Broker, Delivery, Subscription};
use crate::config::RuntimeConfig;
use crate::error::{BroadcastError, Result};
use crate::failures::{FailedDelivery, FailureSink};
use crate::policy::ConsumerPolicy;
use crate::topology::bind_queue;
use crate::types::{Event, ReceivedEvent};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Observable state of a running subscriber
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState<S> {
    /// Latest policy snapshot
    pub policy: S,
    /// Deliveries handled and acknowledged
    pub handled: u64,
    /// Handler failures (each one redelivered)
    pub failed: u64,
    /// Undecodable deliveries, acknowledged and dropped
    pub rejected: u64,
    /// Successful reconnects after a dropped subscription
    pub reconnects: u64,
    /// Whether a subscription is currently open
    pub connected: bool,
}

/// Runs a consumer policy against one queue of a broadcast channel
pub struct SubscriberRuntime<P: ConsumerPolicy> {
    broker: Arc<dyn Broker>,
    channel: String,
    queue: String,
    durable: bool,
    role: String,
    policy: P,
    failures: Option<Arc<dyn FailureSink>>,
    config: RuntimeConfig,
    state: watch::Sender<RuntimeState<P::Snapshot>>,
}

impl<P: ConsumerPolicy> SubscriberRuntime<P> {
    pub fn new(
        broker: Arc<dyn Broker>,
        channel: impl Into<String>,
        queue: impl Into<String>,
        policy: P,
    ) -> Self {
        let (state, _) = watch::channel(RuntimeState {
            policy: policy.snapshot(),
            handled: 0,
            failed: 0,
            rejected: 0,
            reconnects: 0,
            connected: false,
        });

        Self {
            broker,
            channel: channel.into(),
            queue: queue.into(),
            durable: true,
            role: policy.role().to_string(),
            policy,
            failures: None,
            config: RuntimeConfig::default(),
            state,
        }
    }

    /// Set retry and reconnect behaviour
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Report failed deliveries to `sink`
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failures = Some(sink);
        self
    }

    /// Durability used when (re)declaring the channel and queue
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Watch the runtime's state
    pub fn watch(&self) -> watch::Receiver<RuntimeState<P::Snapshot>> {
        self.state.subscribe()
    }

    /// Run on a new task
    pub fn spawn(self, shutdown: CancellationToken) -> RuntimeHandle<P> {
        let state = self.watch();
        let task = tokio::spawn(self.run(shutdown.clone()));
        RuntimeHandle {
            state,
            shutdown,
            task,
        }
    }

    /// Run until cancelled, returning the policy with its final state
    ///
    /// Fails if the initial bind or subscribe fails, or if reconnecting
    /// exhausts its attempt budget.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<P> {
        let mut subscription = self.connect().await?;
        tracing::info!(
            role = %self.role,
            queue = %self.queue,
            channel = %self.channel,
            broker = self.broker.name(),
            "Subscriber started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = subscription.next() => next,
            };

            let cause = match next {
                Ok(Some(delivery)) => {
                    self.process(delivery, &shutdown).await;
                    continue;
                }
                Ok(None) => {
                    BroadcastError::Connection(format!("subscription to '{}' ended", self.queue))
                }
                Err(e) => e,
            };

            drop(subscription);
            self.state.send_modify(|s| s.connected = false);
            subscription = match self.reconnect(cause, &shutdown).await? {
                Some(subscription) => subscription,
                None => break,
            };
        }

        self.state.send_modify(|s| s.connected = false);
        tracing::info!(role = %self.role, queue = %self.queue, "Subscriber stopped");
        Ok(self.policy)
    }

    /// Bind the queue and open a subscription
    async fn connect(&self) -> Result<Box<dyn Subscription>> {
        bind_queue(self.broker.as_ref(), &self.channel, &self.queue, self.durable).await?;
        let subscription = self.broker.subscribe(&self.queue).await?;
        self.state.send_modify(|s| s.connected = true);
        Ok(subscription)
    }

    /// Retry `connect` after a drop; `Ok(None)` when cancelled meanwhile
    async fn reconnect(
        &self,
        cause: BroadcastError,
        shutdown: &CancellationToken,
    ) -> Result<Option<Box<dyn Subscription>>> {
        let mut last_error = cause;

        for attempt in 1..=self.config.max_reconnect_attempts {
            tracing::warn!(
                role = %self.role,
                queue = %self.queue,
                attempt,
                max_attempts = self.config.max_reconnect_attempts,
                error = %last_error,
                "Subscription lost, reconnecting"
            );

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }

            match self.connect().await {
                Ok(subscription) => {
                    self.state.send_modify(|s| s.reconnects += 1);
                    tracing::info!(role = %self.role, queue = %self.queue, attempt, "Resubscribed");
                    return Ok(Some(subscription));
                }
                Err(e) => last_error = e,
            }
        }

        tracing::error!(
            role = %self.role,
            queue = %self.queue,
            error = %last_error,
            "Giving up on reconnecting"
        );
        Err(last_error)
    }

    async fn process(&mut self, delivery: Delivery, shutdown: &CancellationToken) {
        let event = match Event::from_bytes(&delivery.body) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    role = %self.role,
                    queue = %delivery.queue,
                    sequence = delivery.sequence,
                    error = %e,
                    "Undecodable delivery, dropping"
                );
                self.report(FailedDelivery::undecodable(
                    &self.role,
                    &delivery.queue,
                    delivery.sequence,
                    delivery.num_delivered,
                    e.to_string(),
                ))
                .await;
                let sequence = delivery.sequence;
                if let Err(e) = delivery.ack().await {
                    tracing::warn!(queue = %self.queue, sequence, error = %e, "Ack failed");
                }
                self.state.send_modify(|s| s.rejected += 1);
                return;
            }
        };

        let received = ReceivedEvent {
            event,
            queue: delivery.queue.clone(),
            sequence: delivery.sequence,
            num_delivered: delivery.num_delivered,
        };

        match self.policy.handle(&received.event).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    // Unacked deliveries come back, so the effect may repeat
                    tracing::warn!(
                        queue = %received.queue,
                        sequence = received.sequence,
                        error = %e,
                        "Ack failed"
                    );
                }
                tracing::debug!(
                    role = %self.role,
                    kind = %received.event.action_kind(),
                    subject = received.event.subject_id(),
                    sequence = received.sequence,
                    redelivery = received.is_redelivery(),
                    "Event handled"
                );
                let snapshot = self.policy.snapshot();
                self.state.send_modify(|s| {
                    s.handled += 1;
                    s.policy = snapshot;
                });
            }
            Err(e) => {
                tracing::error!(
                    role = %self.role,
                    queue = %received.queue,
                    sequence = received.sequence,
                    attempt = received.num_delivered,
                    error = %e,
                    "Handler failed, event will be redelivered"
                );
                self.report(FailedDelivery::handler(&self.role, &received, e.to_string()))
                    .await;
                let snapshot = self.policy.snapshot();
                self.state.send_modify(|s| {
                    s.failed += 1;
                    s.policy = snapshot;
                });

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.config.retry_backoff()) => {}
                }
                if let Err(e) = delivery.nak().await {
                    tracing::warn!(
                        queue = %received.queue,
                        sequence = received.sequence,
                        error = %e,
                        "Nak failed"
                    );
                }
            }
        }
    }

    async fn report(&self, failure: FailedDelivery) {
        if let Some(ref sink) = self.failures {
            if let Err(e) = sink.record(failure).await {
                tracing::warn!(role = %self.role, error = %e, "Failed to record failure");
            }
        }
    }
}

/// Handle to a spawned subscriber runtime
pub struct RuntimeHandle<P: ConsumerPolicy> {
    state: watch::Receiver<RuntimeState<P::Snapshot>>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<P>>,
}

impl<P: ConsumerPolicy> RuntimeHandle<P> {
    /// Current runtime state
    pub fn state(&self) -> RuntimeState<P::Snapshot> {
        self.state.borrow().clone()
    }

    /// Current policy snapshot
    pub fn snapshot(&self) -> P::Snapshot {
        self.state.borrow().policy.clone()
    }

    /// Wait until the runtime state satisfies `predicate`
    ///
    /// Fails if the runtime ends first without satisfying it.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&RuntimeState<P::Snapshot>) -> bool,
    ) -> Result<RuntimeState<P::Snapshot>> {
        let mut state = self.state.clone();
        let current = state
            .wait_for(predicate)
            .await
            .map_err(|_| BroadcastError::Broker("subscriber runtime ended".to_string()))?;
        Ok(current.clone())
    }

    /// Whether the runtime task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the runtime and wait for it to settle its in-flight delivery
    pub async fn shutdown(self) -> Result<P> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Wait for the runtime to end on its own
    pub async fn join(self) -> Result<P> {
        self.task
            .await
            .map_err(|e| BroadcastError::Broker(format!("subscriber task failed: {}", e)))?
    }
}
