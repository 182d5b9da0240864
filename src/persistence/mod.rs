//! Durable storage for list entries added at runtime.
//!
//! The engine only needs four operations from a store; failures are surfaced
//! as `FirewallError::PersistenceUnavailable` and never swallowed, because a
//! mutating list operation must not silently disappear.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;

use crate::core::ListEntry;
use crate::utils::FirewallResult;

/// Backing store of persistent list entries, keyed by normalized address
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Entry stored for `address`
    async fn find_by_address(&self, address: &str) -> FirewallResult<Option<ListEntry>>;

    /// Store a new entry, replacing any entry for the same address
    async fn create(&self, address: &str, whitelisted: bool) -> FirewallResult<ListEntry>;

    /// Delete the entry for `address`; `false` if there was none
    async fn delete(&self, address: &str) -> FirewallResult<bool>;

    /// Every entry in insertion order
    async fn all(&self) -> FirewallResult<Vec<ListEntry>>;
}
