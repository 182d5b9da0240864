//! Shared TTL cache.
//!
//! One backend is shared by every component. Each component holds its own
//! [`Cache`] handle carrying the TTL of the feature it caches; a handle whose
//! TTL is zero or negative never stores anything and always misses, which is
//! how address caching, snapshot caching and attack windows are toggled
//! independently.

mod memory;
mod redis;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use crate::utils::FirewallResult;

/// Prefix of every key produced by [`hashed_key`]
pub const CACHE_BASE_NAME: &str = "firewall.";

/// Raw key/value storage with expiry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a live value
    async fn get(&self, key: &str) -> FirewallResult<Option<String>>;

    /// Store a value for `ttl_seconds`
    async fn put(&self, key: &str, value: String, ttl_seconds: u64) -> FirewallResult<()>;

    /// Remove a value
    async fn forget(&self, key: &str) -> FirewallResult<()>;

    /// Remove every value owned by this backend
    async fn flush(&self) -> FirewallResult<()>;
}

/// Build a collision-free cache key for `value` inside `namespace`
///
/// Keys are SHA-256 digests of `firewall.<namespace>.<value>`, so addresses,
/// country tokens and attack subjects never clash.
pub fn hashed_key(namespace: &str, value: &str) -> String {
    let digest = Sha256::digest(format!("{}{}.{}", CACHE_BASE_NAME, namespace, value).as_bytes());
    format!("{:x}", digest)
}

/// Typed cache handle with its own TTL
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    ttl_seconds: i64,
}

impl Cache {
    /// Create a handle over `backend` that stores values for `ttl_seconds`
    pub fn new(backend: Arc<dyn CacheBackend>, ttl_seconds: i64) -> Self {
        Self {
            backend,
            ttl_seconds,
        }
    }

    /// Another handle over the same backend with a different TTL
    pub fn with_ttl(&self, ttl_seconds: i64) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            ttl_seconds,
        }
    }

    /// Whether this handle stores anything at all
    pub fn is_enabled(&self) -> bool {
        self.ttl_seconds > 0
    }

    /// TTL of this handle in seconds
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Check whether a live value exists
    pub async fn has(&self, key: &str) -> FirewallResult<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }

        Ok(self.backend.get(key).await?.is_some())
    }

    /// Fetch and decode a value
    ///
    /// A value that no longer decodes is dropped and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> FirewallResult<Option<T>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable cache entry");
                self.backend.forget(key).await?;
                Ok(None)
            }
        }
    }

    /// Store a value for this handle's TTL
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> FirewallResult<()> {
        self.put_for(key, value, self.ttl_seconds).await
    }

    /// Store a value for an explicit TTL; a TTL of zero or less stores nothing
    pub async fn put_for<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: i64,
    ) -> FirewallResult<()> {
        if !self.is_enabled() || ttl_seconds <= 0 {
            return Ok(());
        }

        let raw = serde_json::to_string(value)?;
        self.backend.put(key, raw, ttl_seconds as u64).await
    }

    /// Remove a value
    pub async fn forget(&self, key: &str) -> FirewallResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        self.backend.forget(key).await
    }

    /// Remove every value in the shared backend
    pub async fn flush(&self) -> FirewallResult<()> {
        self.backend.flush().await
    }
}
