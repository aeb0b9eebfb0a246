//! Engine configuration
//!
//! Every section falls back to its defaults, so a partial JSON document
//! (or none at all) yields a working setup.

use crate::broker::nats::NatsConfig;
use crate::error::{BroadcastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Channel, queues and bindings
    pub topology: TopologyConfig,

    /// Subscriber runtime behaviour
    pub runtime: RuntimeConfig,

    /// Audit record store location and format
    pub audit: AuditStoreConfig,

    /// NATS connection, when the NATS broker is used
    pub nats: NatsConfig,
}

impl EngineConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| BroadcastError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BroadcastError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.topology.validate()?;
        if self.audit.path.as_os_str().is_empty() {
            return Err(BroadcastError::Config("Audit store path cannot be empty".to_string()));
        }
        if self.audit.max_backlog == 0 {
            return Err(BroadcastError::Config("Audit backlog cap must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Broadcast channel and the queues bound to it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopologyConfig {
    /// Channel name
    pub channel: String,

    /// Whether the channel and its queues survive a broker restart
    pub durable: bool,

    /// One queue per consumer role
    pub queues: Vec<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            channel: "user_actions".to_string(),
            durable: true,
            queues: vec![
                "analytics_queue".to_string(),
                "notification_queue".to_string(),
                "audit_queue".to_string(),
                "cache_queue".to_string(),
            ],
        }
    }
}

impl TopologyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(BroadcastError::Config("Channel name cannot be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.trim().is_empty() {
                return Err(BroadcastError::Config("Queue name cannot be empty".to_string()));
            }
            if !seen.insert(queue.as_str()) {
                return Err(BroadcastError::Config(format!("Duplicate queue '{}'", queue)));
            }
        }
        Ok(())
    }
}

/// Subscriber runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Pause before handing a failed event back for redelivery
    pub retry_backoff_ms: u64,

    /// Pause between reconnect attempts after a transport drop
    pub reconnect_delay_ms: u64,

    /// Consecutive reconnect attempts before the runtime gives up
    /// (0 = never reconnect)
    pub max_reconnect_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 500,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 10,
        }
    }
}

impl RuntimeConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// On-disk layout of the audit record store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditFormat {
    /// One pretty-printed JSON array, rewritten atomically on each append
    #[default]
    Document,
    /// JSON lines, appended in place
    Lines,
}

/// Audit record store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditStoreConfig {
    pub path: PathBuf,
    pub format: AuditFormat,

    /// Entries held in memory while the store is failing; past this the
    /// audit role refuses events so the broker redelivers them
    pub max_backlog: usize,
}

impl Default for AuditStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("audit_log.json"),
            format: AuditFormat::Document,
            max_backlog: 1000,
        }
    }
}
