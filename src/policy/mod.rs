//! Consumer policies: the per-role decision logic applied to each event
//!
//! A policy owns its local state exclusively; the subscriber runtime that
//! drives it publishes read-only snapshots after every handled event.
//! Dispatch is a closed `match` over [`ActionKind`](crate::types::ActionKind)
//! with an explicit arm for unrecognized kinds in every policy.

use crate::error::Result;
use crate::types::Event;
use async_trait::async_trait;
use std::fmt::Debug;

pub mod analytics;
pub mod audit;
pub mod cache;
pub mod notification;

pub use analytics::{ActionCounts, AnalyticsPolicy};
pub use audit::{AuditPolicy, AuditStats};
pub use cache::{CacheBackend, CacheInvalidator, CacheKey, CacheStats, MemoryCache};
pub use notification::{
    LogNotifier, Notification, NotificationKind, NotificationPolicy, NotificationStats, Notifier,
    RecordingNotifier,
};

/// Decision logic for one consumer role
#[async_trait]
pub trait ConsumerPolicy: Send + Sync + 'static {
    /// Read-only view of the policy's local state
    type Snapshot: Clone + Debug + Send + Sync + 'static;

    /// Role name used in logs and failure reports
    fn role(&self) -> &str;

    /// Apply this role's effect for one event
    ///
    /// Returning `Err` leaves the event unacknowledged so it is redelivered.
    async fn handle(&mut self, event: &Event) -> Result<()>;

    /// Current local state
    fn snapshot(&self) -> Self::Snapshot;
}
