//! Append-only audit record persistence
//!
//! Two on-disk layouts are provided:
//!
//! - `JsonFileAuditStore` keeps the whole trail as one pretty-printed JSON
//!   array and rewrites it on every append. The new snapshot is written to
//!   a temp file, synced, then renamed over the old one, so a failed write
//!   leaves the previous snapshot intact.
//! - `JsonlAuditStore` appends one JSON object per line. A torn trailing
//!   line from a crash mid-write is skipped on load, and the next append
//!   starts on a fresh line.
//!
//! Both assume a single writer process. Appends within a process are
//! serialized by an async mutex; two processes appending to the same file
//! can lose entries.

use super::AuditEntry;
use crate::config::{AuditFormat, AuditStoreConfig};
use crate::error::{BroadcastError, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

/// Trait for audit record stores
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Durably append one entry after all previously appended entries
    async fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// Load all entries in append order; a missing store is empty
    async fn load(&self) -> Result<Vec<AuditEntry>>;

    /// Number of stored entries
    async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }
}

/// Open the store described by `config`
pub fn open_store(config: &AuditStoreConfig) -> Arc<dyn AuditStore> {
    match config.format {
        AuditFormat::Document => Arc::new(JsonFileAuditStore::new(&config.path)),
        AuditFormat::Lines => Arc::new(JsonlAuditStore::new(&config.path)),
    }
}

/// JSON document store, rewritten atomically on each append
pub struct JsonFileAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BroadcastError::Storage(format!(
                    "Failed to read audit file {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&json).map_err(|e| {
            BroadcastError::Storage(format!(
                "Failed to parse audit file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn write_entries(&self, entries: &[AuditEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                BroadcastError::Storage(format!(
                    "Failed to create audit directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // Atomic write: write to temp file, sync, then rename
        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
            BroadcastError::Storage(format!(
                "Failed to create {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        file.write_all(json.as_bytes()).await.map_err(|e| {
            BroadcastError::Storage(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            BroadcastError::Storage(format!("Failed to sync {}: {}", tmp_path.display(), e))
        })?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            BroadcastError::Storage(format!(
                "Failed to rename audit file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl AuditStore for JsonFileAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // A snapshot that fails to parse is never overwritten
        let mut entries = self.read_entries().await?;
        entries.push(entry.clone());
        self.write_entries(&entries).await?;

        tracing::debug!(
            path = %self.path.display(),
            log_id = %entry.log_id,
            count = entries.len(),
            "Audit entry appended"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Vec<AuditEntry>> {
        self.read_entries().await
    }
}

/// JSON lines store, appended in place
pub struct JsonlAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is missing, empty, or ends in a newline
    async fn ends_cleanly(&self) -> Result<bool> {
        let mut file = match fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(BroadcastError::Storage(format!(
                    "Failed to open audit file {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| BroadcastError::Storage(format!("Failed to stat audit file: {}", e)))?
            .len();
        if len == 0 {
            return Ok(true);
        }

        file.seek(SeekFrom::End(-1))
            .await
            .map_err(|e| BroadcastError::Storage(format!("Failed to seek audit file: {}", e)))?;
        let last = file
            .read_u8()
            .await
            .map_err(|e| BroadcastError::Storage(format!("Failed to read audit file: {}", e)))?;
        Ok(last == b'\n')
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut line = String::new();
        if !self.ends_cleanly().await? {
            tracing::warn!(
                path = %self.path.display(),
                "Audit log ends in a partial line; starting a new one"
            );
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(entry)?);
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                BroadcastError::Storage(format!(
                    "Failed to create audit directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                BroadcastError::Storage(format!(
                    "Failed to open audit file {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        file.write_all(line.as_bytes()).await.map_err(|e| {
            BroadcastError::Storage(format!("Failed to write audit entry: {}", e))
        })?;
        file.sync_data().await.map_err(|e| {
            BroadcastError::Storage(format!("Failed to sync audit file: {}", e))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            log_id = %entry.log_id,
            "Audit entry appended"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Vec<AuditEntry>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BroadcastError::Storage(format!(
                    "Failed to read audit file {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable audit line"
                ),
            }
        }
        Ok(entries)
    }
}

/// In-memory audit store for testing
///
/// Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.entries.read().await.clone())
    }
}
