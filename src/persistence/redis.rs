use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::PersistenceStore;
use crate::core::{EntrySource, ListEntry};
use crate::utils::{Clock, FirewallError, FirewallResult};

/// Persistent list stored in a Redis hash
///
/// The hash lives at `<prefix>:list`, keyed by normalized address, with the
/// JSON-encoded entry as value.
pub struct RedisStore {
    /// Redis connection, reconnected automatically
    conn: ConnectionManager,
    /// Hash holding the entries
    list_key: String,
    clock: Arc<dyn Clock>,
}

impl RedisStore {
    /// Create a new Redis list store
    pub async fn new(
        redis_url: &str,
        key_prefix: &str,
        clock: Arc<dyn Clock>,
    ) -> FirewallResult<Self> {
        let client = Client::open(redis_url).map_err(FirewallError::persistence)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(FirewallError::persistence)?;

        Ok(Self {
            conn,
            list_key: format!("{}:list", key_prefix),
            clock,
        })
    }
}

#[async_trait]
impl PersistenceStore for RedisStore {
    async fn find_by_address(&self, address: &str) -> FirewallResult<Option<ListEntry>> {
        let mut conn = self.conn.clone();

        let raw: Option<String> = conn
            .hget(&self.list_key, address)
            .await
            .map_err(FirewallError::persistence)?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(FirewallError::from))
            .transpose()
    }

    async fn create(&self, address: &str, whitelisted: bool) -> FirewallResult<ListEntry> {
        let entry = ListEntry::new(
            address,
            whitelisted,
            EntrySource::Persistent,
            self.clock.now(),
        );
        let raw = serde_json::to_string(&entry)?;

        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(&self.list_key, &entry.address, raw)
            .await
            .map_err(FirewallError::persistence)?;

        Ok(entry)
    }

    async fn delete(&self, address: &str) -> FirewallResult<bool> {
        let mut conn = self.conn.clone();

        let removed: i64 = conn
            .hdel(&self.list_key, address)
            .await
            .map_err(FirewallError::persistence)?;

        Ok(removed > 0)
    }

    async fn all(&self) -> FirewallResult<Vec<ListEntry>> {
        let mut conn = self.conn.clone();

        let values: Vec<String> = conn
            .hvals(&self.list_key)
            .await
            .map_err(FirewallError::persistence)?;

        let mut entries = values
            .iter()
            .map(|raw| serde_json::from_str::<ListEntry>(raw))
            .collect::<Result<Vec<_>, _>>()?;

        // Hashes are unordered; creation time restores insertion order.
        entries.sort_by_key(|entry| entry.created_at);

        Ok(entries)
    }
}
