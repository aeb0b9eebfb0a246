//! Audit role: append one compliance entry per event
//!
//! Entries that fail to persist are kept in an in-memory backlog and
//! retried, oldest first, before any newer entry is written, so the store
//! stays in event order. Events whose entry lands in the backlog are still
//! acknowledged. The backlog is capped: once full, the event is refused
//! with an error and the broker redelivers it later, so a store that stays
//! down fills the queue rather than process memory.

use super::ConsumerPolicy;
use crate::audit::store::open_store;
use crate::audit::{AuditEntry, AuditStore};
use crate::config::AuditStoreConfig;
use crate::error::{BroadcastError, Result};
use crate::types::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Counters kept by the audit role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    /// Entries persisted to the store
    pub appended: u64,
    /// Entries waiting in the backlog
    pub pending: u64,
    /// Failed append attempts
    pub write_failures: u64,
    /// Events refused because the backlog was full
    pub refused: u64,
}

/// Records every event in the audit store
pub struct AuditPolicy {
    store: Arc<dyn AuditStore>,
    backlog: VecDeque<AuditEntry>,
    max_backlog: usize,
    stats: AuditStats,
}

impl AuditPolicy {
    /// Default number of unpersisted entries held before events are refused
    pub const DEFAULT_MAX_BACKLOG: usize = 1000;

    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            backlog: VecDeque::new(),
            max_backlog: Self::DEFAULT_MAX_BACKLOG,
            stats: AuditStats::default(),
        }
    }

    /// Open the configured store and apply its backlog cap
    pub fn from_config(config: &AuditStoreConfig) -> Self {
        Self::new(open_store(config)).with_max_backlog(config.max_backlog)
    }

    /// Cap the backlog; a cap of zero is treated as one
    pub fn with_max_backlog(mut self, max_backlog: usize) -> Self {
        self.max_backlog = max_backlog.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Write backlog entries in order, stopping at the first failure
    async fn flush(&mut self) {
        while let Some(entry) = self.backlog.front() {
            match self.store.append(entry).await {
                Ok(()) => {
                    self.backlog.pop_front();
                    self.stats.appended += 1;
                }
                Err(e) => {
                    self.stats.write_failures += 1;
                    tracing::warn!(
                        log_id = %entry.log_id,
                        pending = self.backlog.len(),
                        error = %e,
                        "Audit append failed; keeping entry in backlog"
                    );
                    self.stats.pending = self.backlog.len() as u64;
                    return;
                }
            }
        }
        self.stats.pending = 0;
    }
}

impl Drop for AuditPolicy {
    fn drop(&mut self) {
        if !self.backlog.is_empty() {
            tracing::error!(
                pending = self.backlog.len(),
                "Audit policy dropped with unpersisted entries"
            );
        }
    }
}

#[async_trait]
impl ConsumerPolicy for AuditPolicy {
    type Snapshot = AuditStats;

    fn role(&self) -> &str {
        "audit"
    }

    async fn handle(&mut self, event: &Event) -> Result<()> {
        let entry = AuditEntry::from_event(event);
        tracing::debug!(
            log_id = %entry.log_id,
            kind = %entry.action_kind,
            flags = ?entry.compliance_flags,
            "Audit entry created"
        );

        self.backlog.push_back(entry);
        self.flush().await;

        if self.backlog.len() > self.max_backlog {
            self.backlog.pop_back();
            self.stats.pending = self.backlog.len() as u64;
            self.stats.refused += 1;
            return Err(BroadcastError::Storage(format!(
                "audit backlog full ({} entries unpersisted)",
                self.backlog.len()
            )));
        }
        Ok(())
    }

    fn snapshot(&self) -> AuditStats {
        self.stats
    }
}
