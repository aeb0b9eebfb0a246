//! Analytics role: per-kind action counters

use super::ConsumerPolicy;
use crate::error::Result;
use crate::types::{ActionKind, Event};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Counters kept by the analytics role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCounts {
    pub login: u64,
    pub purchase: u64,
    pub profile_update: u64,
    /// Every handled event, including unrecognized kinds
    pub total: u64,
}

/// Counts actions by kind
#[derive(Debug, Default)]
pub struct AnalyticsPolicy {
    counts: ActionCounts,
}

impl AnalyticsPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> ActionCounts {
        self.counts
    }
}

#[async_trait]
impl ConsumerPolicy for AnalyticsPolicy {
    type Snapshot = ActionCounts;

    fn role(&self) -> &str {
        "analytics"
    }

    async fn handle(&mut self, event: &Event) -> Result<()> {
        match event.action_kind() {
            ActionKind::Login => self.counts.login += 1,
            ActionKind::Purchase => self.counts.purchase += 1,
            ActionKind::ProfileUpdate => self.counts.profile_update += 1,
            ActionKind::Other(kind) => {
                tracing::debug!(kind = %kind, "Analytics: unrecognized action kind");
            }
        }
        self.counts.total += 1;

        tracing::debug!(
            kind = %event.action_kind(),
            subject = event.subject_id(),
            total = self.counts.total,
            "Analytics updated"
        );
        Ok(())
    }

    fn snapshot(&self) -> ActionCounts {
        self.counts
    }
}
