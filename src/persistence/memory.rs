use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::PersistenceStore;
use crate::core::{EntrySource, ListEntry};
use crate::utils::{Clock, FirewallResult};

/// Process-local persistent store
pub struct MemoryStore {
    entries: RwLock<Vec<ListEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            clock,
        }
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn find_by_address(&self, address: &str) -> FirewallResult<Option<ListEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|entry| entry.address == address).cloned())
    }

    async fn create(&self, address: &str, whitelisted: bool) -> FirewallResult<ListEntry> {
        let entry = ListEntry::new(
            address,
            whitelisted,
            EntrySource::Persistent,
            self.clock.now(),
        );

        let mut entries = self.entries.write().await;
        entries.retain(|existing| existing.address != entry.address);
        entries.push(entry.clone());

        Ok(entry)
    }

    async fn delete(&self, address: &str) -> FirewallResult<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.address != address);
        Ok(entries.len() < before)
    }

    async fn all(&self) -> FirewallResult<Vec<ListEntry>> {
        Ok(self.entries.read().await.clone())
    }
}
