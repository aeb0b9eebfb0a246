//! Audit entries derived from broadcast events
//!
//! Each entry carries a set of compliance flags computed purely from the
//! event's action kind, and a log id that stays unique under rapid
//! successive calls within one process.

pub mod store;

use crate::types::{ActionKind, Event, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

pub use store::{AuditStore, JsonFileAuditStore, JsonlAuditStore, MemoryAuditStore};

/// Compliance classification attached to an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceFlag {
    /// Every audited event
    Logged,
    /// Authentication activity
    SecurityEvent,
    /// Money changed hands
    FinancialRecord,
    /// Personal data was modified
    PiiChange,
    /// Subject to GDPR record-keeping
    Gdpr,
}

/// Compliance flags for an action kind
///
/// Unrecognized kinds are still logged, with no further classification.
pub fn compliance_flags(kind: &ActionKind) -> BTreeSet<ComplianceFlag> {
    use ComplianceFlag::*;

    let extra: &[ComplianceFlag] = match kind {
        ActionKind::Login => &[SecurityEvent],
        ActionKind::Purchase => &[FinancialRecord],
        ActionKind::ProfileUpdate => &[PiiChange, Gdpr],
        ActionKind::Other(_) => &[],
    };
    std::iter::once(Logged).chain(extra.iter().copied()).collect()
}

static LOG_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a unique audit log id
///
/// Format: `AUD-<unix millis>-<process sequence>-<random>`. The sequence
/// keeps ids distinct within a process even when the clock does not move;
/// the random suffix keeps separate processes apart.
pub fn next_log_id() -> String {
    let sequence = LOG_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "AUD-{}-{:06}-{}",
        Utc::now().timestamp_millis(),
        sequence,
        &random[..8]
    )
}

/// An append-only compliance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub log_id: String,
    pub action_kind: ActionKind,
    pub subject_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Payload,
    pub compliance_flags: BTreeSet<ComplianceFlag>,
    /// When the audit consumer recorded the entry
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Derive an entry from an event
    pub fn from_event(event: &Event) -> Self {
        Self {
            log_id: next_log_id(),
            action_kind: event.action_kind().clone(),
            subject_id: event.subject_id().to_string(),
            occurred_at: event.occurred_at(),
            payload: event.payload().clone(),
            compliance_flags: compliance_flags(event.action_kind()),
            recorded_at: Utc::now(),
        }
    }

    pub fn has_flag(&self, flag: ComplianceFlag) -> bool {
        self.compliance_flags.contains(&flag)
    }
}
