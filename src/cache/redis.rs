use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::CacheBackend;
use crate::utils::{FirewallError, FirewallResult};

/// Cache backend stored in Redis
///
/// Every key is stored under `<prefix>:cache:` so that a flush only removes
/// the firewall's own values.
pub struct RedisCache {
    /// Redis connection, reconnected automatically
    conn: ConnectionManager,
    /// Key namespace
    prefix: String,
}

impl RedisCache {
    /// Create a new Redis cache instance
    pub async fn new(redis_url: &str, key_prefix: &str) -> FirewallResult<Self> {
        let client = Client::open(redis_url).map_err(FirewallError::Redis)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(FirewallError::Redis)?;

        Ok(Self {
            conn,
            prefix: format!("{}:cache:", key_prefix),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> FirewallResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl_seconds: u64) -> FirewallResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl_seconds as usize)
            .await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> FirewallResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key)).await?;
        Ok(())
    }

    async fn flush(&self) -> FirewallResult<()> {
        let mut conn = self.conn.clone();

        let keys: Vec<String> = conn.keys(format!("{}*", self.prefix)).await?;
        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }

        Ok(())
    }
}
