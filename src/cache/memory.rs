use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::CacheBackend;
use crate::utils::{Clock, FirewallResult};

/// Ten years
const MAX_TTL_SECONDS: u64 = 315_360_000;

/// A cached value and the moment it stops being visible
#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process cache backend
///
/// Expiry is judged against the injected clock, so tests can age entries
/// without sleeping. Expired entries are invisible immediately and reclaimed
/// by [`MemoryCache::purge_expired`] or on overwrite.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CachedValue>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Create an empty cache driven by `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Drop every expired entry and return how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.expires_at >= now);
        before - entries.len()
    }

    /// Number of stored entries, expired or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> FirewallResult<Option<String>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;

        Ok(entries
            .get(key)
            .filter(|cached| cached.expires_at >= now)
            .map(|cached| cached.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl_seconds: u64) -> FirewallResult<()> {
        let ttl = Duration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64);
        let expires_at = self.clock.now() + ttl;

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CachedValue { value, expires_at });

        Ok(())
    }

    async fn forget(&self, key: &str) -> FirewallResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn flush(&self) -> FirewallResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}
