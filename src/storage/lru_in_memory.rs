use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde_json::Value;
use tracing::trace;

use super::CacheStorage;
use crate::Result;

/// Default number of entries kept before least-recently-used eviction
pub const DEFAULT_LRU_CAPACITY: u64 = 500;

#[derive(Debug)]
struct StoredEntry {
    value: Value,
    ttl: Duration,
}

/// Expires each entry after the ttl it was stored with
struct PerEntryTtl;

impl PerEntryTtl {
    fn ttl_of(entry: &StoredEntry) -> Option<Duration> {
        (!entry.ttl.is_zero()).then_some(entry.ttl)
    }
}

impl Expiry<String, Arc<StoredEntry>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<StoredEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Self::ttl_of(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<StoredEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::ttl_of(value)
    }
}

/// Bounded in-process storage with LRU eviction and per-entry ttl.
///
/// Reads hand out clones, so a caller mutating a returned value never
/// changes what other callers see.
#[derive(Clone)]
pub struct LruInMemoryStorage {
    cache: Cache<String, Arc<StoredEntry>>,
}

impl std::fmt::Debug for LruInMemoryStorage {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LruInMemoryStorage")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl Default for LruInMemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_LRU_CAPACITY)
    }
}

impl LruInMemoryStorage {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Approximate number of live entries
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait]
impl CacheStorage for LruInMemoryStorage {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Value>> {
        Ok(self.cache.get(key).await.map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        ttl: Duration,
        value: Value,
    ) -> Result<()> {
        trace!(key, ttl_ms = ttl.as_millis() as u64, "storing entry");
        self.cache
            .insert(key.to_string(), Arc::new(StoredEntry { value, ttl }))
            .await;
        Ok(())
    }

    async fn evict(
        &self,
        key: &str,
    ) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
