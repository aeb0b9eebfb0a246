//! # a3s-broadcast
//!
//! Durable broadcast dispatch of domain events to independent consumer roles.
//!
//! ## Overview
//!
//! A producer publishes a user action once; every subscription queue bound
//! to the broadcast channel receives its own copy. Each consumer role
//! (analytics, notification, audit, cache invalidation) runs in its own
//! subscriber runtime, acknowledges only what it has handled, and never
//! sees another role's failures.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_broadcast::{
//!     Action, AnalyticsPolicy, MemoryBroker, Publisher, SubscriberRuntime, Topology,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> a3s_broadcast::Result<()> {
//! let broker = Arc::new(MemoryBroker::new());
//!
//! // Declare the channel and bind one queue per role
//! Topology::new("user_actions")
//!     .with_queue("analytics_queue")
//!     .setup(broker.as_ref())
//!     .await?;
//!
//! let analytics = SubscriberRuntime::new(
//!     broker.clone(),
//!     "user_actions",
//!     "analytics_queue",
//!     AnalyticsPolicy::new(),
//! )
//! .spawn(CancellationToken::new());
//!
//! let publisher = Publisher::connect(broker.clone(), "user_actions").await?;
//! publisher
//!     .publish(Action::new("login", "alice123", serde_json::json!({"ip": "10.0.0.1"})))
//!     .await?;
//!
//! analytics.wait_until(|s| s.handled == 1).await?;
//! println!("Logins: {}", analytics.snapshot().login);
//! analytics.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Brokers
//!
//! - **memory**: In-process durable multicast broker for tests and single-process use
//! - **nats**: NATS JetStream, one stream per channel and one durable consumer per queue
//!
//! ## Architecture
//!
//! - **Broker** trait: declare, bind, publish, subscribe; all backends implement it
//! - **Publisher**: validates actions and broadcasts them as events
//! - **SubscriberRuntime**: drives one `ConsumerPolicy` from one queue with manual acks
//! - **AuditStore**: append-only persistence for compliance records

pub mod audit;
pub mod broker;
pub mod config;
pub mod error;
pub mod failures;
pub mod policy;
pub mod publisher;
pub mod runtime;
pub mod topology;
pub mod types;

// Re-export core types
pub use audit::{
    AuditEntry, AuditStore, ComplianceFlag, JsonFileAuditStore, JsonlAuditStore,
    MemoryAuditStore,
};
pub use broker::{Broker, BrokerInfo, Delivery, QueueInfo, Subscription};
pub use config::{AuditFormat, AuditStoreConfig, EngineConfig, RuntimeConfig, TopologyConfig};
pub use error::{BroadcastError, Result};
pub use failures::{FailedDelivery, FailureSink, MemoryFailureSink};
pub use policy::{
    AnalyticsPolicy, AuditPolicy, CacheInvalidator, ConsumerPolicy, NotificationPolicy,
};
pub use publisher::Publisher;
pub use runtime::{RuntimeHandle, RuntimeState, SubscriberRuntime};
pub use topology::Topology;
pub use types::{Action, ActionKind, Event, Payload, ReceivedEvent};

// Re-export brokers for convenience
pub use broker::memory::MemoryBroker;
pub use broker::nats::{NatsBroker, NatsClient, NatsConfig, NatsSubscription};
