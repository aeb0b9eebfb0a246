//! Cache invalidation role
//!
//! Purchases invalidate the subject's entry and the purchased product's
//! entry; profile updates invalidate the subject's entry. Every other kind
//! is skipped. The invalidation counter advances once per backend call, so
//! a purchase with a `productId` counts twice.

use super::ConsumerPolicy;
use crate::error::Result;
use crate::types::{ActionKind, Event};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A cache entry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    Subject(String),
    Product(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Subject(id) => write!(f, "user:{}", id),
            CacheKey::Product(id) => write!(f, "product:{}", id),
        }
    }
}

/// Keys an event invalidates
pub fn targets(event: &Event) -> Vec<CacheKey> {
    let subject = CacheKey::Subject(event.subject_id().to_string());
    match event.action_kind() {
        ActionKind::Purchase => {
            let mut keys = vec![subject];
            if let Some(product) = event.payload_text("productId") {
                keys.push(CacheKey::Product(product));
            }
            keys
        }
        ActionKind::ProfileUpdate => vec![subject],
        ActionKind::Login | ActionKind::Other(_) => Vec::new(),
    }
}

/// Cache being kept coherent
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn invalidate(&self, key: &CacheKey) -> Result<()>;
}

/// In-process cache that records every invalidation; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<Mutex<MemoryCacheInner>>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<CacheKey, serde_json::Value>,
    invalidated: Vec<CacheKey>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: CacheKey, value: serde_json::Value) {
        self.inner.lock().await.entries.insert(key, value);
    }

    pub async fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        self.inner.lock().await.entries.get(key).cloned()
    }

    /// Every invalidated key, in call order
    pub async fn invalidations(&self) -> Vec<CacheKey> {
        self.inner.lock().await.invalidated.clone()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.remove(key);
        inner.invalidated.push(key.clone());
        Ok(())
    }
}

/// Counters kept by the cache role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Backend invalidation calls
    pub invalidated: u64,
    /// Events that touched no cache entry
    pub skipped: u64,
}

/// Invalidates cache entries affected by an event
pub struct CacheInvalidator<C: CacheBackend = MemoryCache> {
    backend: C,
    stats: CacheStats,
}

impl Default for CacheInvalidator<MemoryCache> {
    fn default() -> Self {
        Self::new(MemoryCache::new())
    }
}

impl<C: CacheBackend> CacheInvalidator<C> {
    pub fn new(backend: C) -> Self {
        Self {
            backend,
            stats: CacheStats::default(),
        }
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }
}

#[async_trait]
impl<C: CacheBackend + 'static> ConsumerPolicy for CacheInvalidator<C> {
    type Snapshot = CacheStats;

    fn role(&self) -> &str {
        "cache"
    }

    async fn handle(&mut self, event: &Event) -> Result<()> {
        let keys = targets(event);
        if keys.is_empty() {
            self.stats.skipped += 1;
            return Ok(());
        }

        for key in &keys {
            self.backend.invalidate(key).await?;
            self.stats.invalidated += 1;
            tracing::debug!(key = %key, "Cache entry invalidated");
        }
        Ok(())
    }

    fn snapshot(&self) -> CacheStats {
        self.stats
    }
}
