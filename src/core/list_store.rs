use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::cache::{hashed_key, Cache};
use crate::config::Settings;
use crate::core::{AddressSpec, Classification};
use crate::persistence::PersistenceStore;
use crate::utils::{log_list_change, Clock, FirewallResult};

/// Cache namespace of single-address lookups
const IP_ADDRESS_NAMESPACE: &str = "ip_address";

/// Cache namespace of the merged snapshot
const IP_ADDRESS_LIST_NAMESPACE: &str = "ip_address_list";

/// How deep files may reference other files
const MAX_FILE_DEPTH: usize = 8;

/// Where a list entry comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Durable store
    Persistent,
    /// `whitelist` / `blacklist` settings and entries added to them at runtime
    StaticConfig,
    /// Ephemeral entries that live as long as the process
    Session,
}

/// One classified address item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Entry identifier
    pub id: Uuid,
    /// Normalized address item
    pub address: String,
    /// `true` for the whitelist, `false` for the blacklist
    pub whitelisted: bool,
    /// Source of the entry
    pub source: EntrySource,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// Configured file the entry was read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ListEntry {
    /// Create an entry for `address`, normalizing it
    pub fn new(
        address: &str,
        whitelisted: bool,
        source: EntrySource,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: AddressSpec::normalize(address),
            whitelisted,
            source,
            created_at,
            origin: None,
        }
    }

    /// Parsed address item
    pub fn spec(&self) -> AddressSpec {
        AddressSpec::parse(&self.address)
    }

    /// Classification this entry grants
    pub fn classification(&self) -> Classification {
        Classification::from_whitelisted(self.whitelisted)
    }
}

/// Result kind of a list mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOutcomeKind {
    Added,
    Removed,
    /// The item is not an address, range, host or known country
    InvalidAddress,
    /// The item is already in the requested list
    AlreadyListed,
    /// The item is in the other list and the change was not forced
    ConflictingListing,
    /// Nothing to remove
    NotListed,
    /// The item comes from a configured file and cannot be changed here
    ReadOnly,
}

/// Outcome of a list mutation with a user-facing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOutcome {
    pub kind: ListOutcomeKind,
    pub message: String,
}

impl ListOutcome {
    fn new(kind: ListOutcomeKind, message: String) -> Self {
        Self { kind, message }
    }

    /// Outcome for an item that does not parse into a storable address
    pub fn invalid_address(raw: &str) -> Self {
        Self::new(
            ListOutcomeKind::InvalidAddress,
            format!("{} is not a valid IP address", raw.trim()),
        )
    }

    /// Whether the lists changed
    pub fn is_success(&self) -> bool {
        matches!(self.kind, ListOutcomeKind::Added | ListOutcomeKind::Removed)
    }
}

impl fmt::Display for ListOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Statically configured item; may be a file path
#[derive(Debug, Clone)]
struct StaticItem {
    id: Uuid,
    raw: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StaticLists {
    whitelist: Vec<StaticItem>,
    blacklist: Vec<StaticItem>,
}

impl StaticLists {
    fn remove_address(&mut self, address: &str) -> bool {
        let before = self.whitelist.len() + self.blacklist.len();
        self.whitelist
            .retain(|item| AddressSpec::normalize(&item.raw) != address);
        self.blacklist
            .retain(|item| AddressSpec::normalize(&item.raw) != address);
        self.whitelist.len() + self.blacklist.len() < before
    }

    fn remove_raw(&mut self, raw: &str) {
        self.whitelist.retain(|item| item.raw != raw);
        self.blacklist.retain(|item| item.raw != raw);
    }
}

/// Owner of every list entry: persistent, static and session
///
/// Lookups go through a per-address cache and full listings through a
/// snapshot cache; both are invalidated on every mutation.
pub struct ListStore {
    /// Durable store; without one, runtime additions go to the static lists
    persistence: Option<Arc<dyn PersistenceStore>>,
    static_lists: RwLock<StaticLists>,
    session: RwLock<Vec<ListEntry>>,
    address_cache: Cache,
    snapshot_cache: Cache,
    clock: Arc<dyn Clock>,
}

impl ListStore {
    /// Create a store seeded with the configured static lists
    ///
    /// # Arguments
    ///
    /// * `settings` - Static lists and cache TTLs
    /// * `persistence` - Durable store for runtime additions, if any
    /// * `cache` - Shared cache; the store derives its own TTL handles from it
    /// * `clock` - Time source for entry timestamps
    pub fn new(
        settings: &Settings,
        persistence: Option<Arc<dyn PersistenceStore>>,
        cache: &Cache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let to_items = |raw: &[String]| -> Vec<StaticItem> {
            raw.iter()
                .filter(|item| !item.trim().is_empty())
                .map(|item| StaticItem {
                    id: Uuid::new_v4(),
                    raw: item.trim().to_string(),
                    created_at: now,
                })
                .collect()
        };

        Self {
            persistence,
            static_lists: RwLock::new(StaticLists {
                whitelist: to_items(&settings.whitelist),
                blacklist: to_items(&settings.blacklist),
            }),
            session: RwLock::new(Vec::new()),
            address_cache: cache.with_ttl(settings.cache_ttl_seconds),
            snapshot_cache: cache.with_ttl(settings.list_snapshot_ttl_seconds),
            clock,
        }
    }

    /// Whether runtime additions go to a durable store
    pub fn has_persistence(&self) -> bool {
        self.persistence.is_some()
    }

    /// Find the entry for exactly this item; ranges are not scanned
    pub async fn find(&self, raw: &str) -> FirewallResult<Option<ListEntry>> {
        let address = AddressSpec::normalize(raw);
        let key = hashed_key(IP_ADDRESS_NAMESPACE, &address);

        if let Some(entry) = self.address_cache.get::<ListEntry>(&key).await? {
            return Ok(Some(entry));
        }

        let found = self.find_uncached(&address).await?;
        if let Some(entry) = &found {
            self.address_cache.put(&key, entry).await?;
        }

        Ok(found)
    }

    /// Every entry: persistent first, then static (whitelist before
    /// blacklist), then session
    pub async fn all(&self) -> FirewallResult<Vec<ListEntry>> {
        let key = hashed_key(IP_ADDRESS_LIST_NAMESPACE, "all");

        if let Some(list) = self.snapshot_cache.get::<Vec<ListEntry>>(&key).await? {
            return Ok(list);
        }

        let list = self.build_snapshot().await?;
        self.snapshot_cache.put(&key, &list).await?;

        Ok(list)
    }

    /// Put an item on a list
    ///
    /// `listed` is the item's current classification. An item already on the
    /// requested list is left alone; an item on the other list is moved only
    /// when `force` is set.
    pub async fn add(
        &self,
        whitelisted: bool,
        raw: &str,
        force: bool,
        listed: Classification,
    ) -> FirewallResult<ListOutcome> {
        let spec = AddressSpec::parse(raw);
        if !spec.is_valid() {
            let outcome = ListOutcome::invalid_address(raw);
            log_list_change("add", raw, false, &outcome.message);
            return Ok(outcome);
        }

        let address = spec.to_string();
        let wanted = Classification::from_whitelisted(whitelisted);

        if listed == wanted {
            return Ok(self.rejected(
                ListOutcomeKind::AlreadyListed,
                format!("{} is already {}", address, wanted),
            ));
        }

        if listed.is_listed() && !force {
            return Ok(self.rejected(
                ListOutcomeKind::ConflictingListing,
                format!("{} is currently {}", address, listed),
            ));
        }

        if listed.is_listed() {
            if let Some(existing) = self.find_uncached(&address).await? {
                if let Some(origin) = existing.origin {
                    return Ok(self.rejected(
                        ListOutcomeKind::ReadOnly,
                        format!("{} is listed by {} and cannot be changed", address, origin),
                    ));
                }
            }

            self.delete(&address).await?;
        }

        self.insert(whitelisted, &address).await?;

        let outcome = ListOutcome::new(
            ListOutcomeKind::Added,
            format!("{} is now {}", address, wanted),
        );
        log_list_change("add", &address, true, &outcome.message);
        metrics::increment_counter!("firewall_list_changes_total", "action" => "add");

        Ok(outcome)
    }

    /// Take an item off every list it is stored in
    pub async fn remove(&self, raw: &str) -> FirewallResult<ListOutcome> {
        let address = AddressSpec::normalize(raw);

        let Some(entry) = self.find_uncached(&address).await? else {
            return Ok(self.rejected(
                ListOutcomeKind::NotListed,
                format!("{} is not listed", address),
            ));
        };

        if let Some(origin) = &entry.origin {
            return Ok(self.rejected(
                ListOutcomeKind::ReadOnly,
                format!("{} is listed by {} and cannot be removed", address, origin),
            ));
        }

        self.delete(&address).await?;

        let outcome = ListOutcome::new(
            ListOutcomeKind::Removed,
            format!("{} removed from {}", address, list_name(entry.whitelisted)),
        );
        log_list_change("remove", &address, true, &outcome.message);
        metrics::increment_counter!("firewall_list_changes_total", "action" => "remove");

        Ok(outcome)
    }

    /// Remove every entry one at a time and return how many were removed
    ///
    /// Entries read from a configured file are removed by dropping the file
    /// from the static lists.
    pub async fn clear(&self) -> FirewallResult<usize> {
        let entries = self.build_snapshot().await?;
        let mut dropped_files = HashSet::new();
        let mut removed = 0;

        for entry in entries {
            match &entry.origin {
                Some(origin) => {
                    if dropped_files.insert(origin.clone()) {
                        self.static_lists.write().await.remove_raw(origin);
                    }
                    self.invalidate(&entry.address).await?;
                    removed += 1;
                }
                None => {
                    if self.delete(&entry.address).await? {
                        removed += 1;
                    }
                }
            }
        }

        log_list_change("clear", "*", true, &format!("{} entries removed", removed));
        metrics::increment_counter!("firewall_list_changes_total", "action" => "clear");

        Ok(removed)
    }

    /// Put an item on a list for the lifetime of this process only
    ///
    /// Session entries only replace other session entries. An item with a
    /// static or stored entry is reported as already listed or as listed on
    /// the other side, and no session entry is created for it.
    pub async fn add_to_session(&self, whitelisted: bool, raw: &str) -> FirewallResult<ListOutcome> {
        let spec = AddressSpec::parse(raw);
        if !spec.is_valid() {
            return Ok(ListOutcome::invalid_address(raw));
        }

        let address = spec.to_string();
        let wanted = Classification::from_whitelisted(whitelisted);

        if let Some(existing) = self.find_outside_session(&address).await? {
            let listed = existing.classification();
            return Ok(if listed == wanted {
                self.rejected(
                    ListOutcomeKind::AlreadyListed,
                    format!("{} is already {}", address, wanted),
                )
            } else {
                self.rejected(
                    ListOutcomeKind::ConflictingListing,
                    format!("{} is currently {}", address, listed),
                )
            });
        }

        let entry = ListEntry::new(&address, whitelisted, EntrySource::Session, self.clock.now());

        {
            let mut session = self.session.write().await;
            session.retain(|existing| existing.address != address);
            session.push(entry);
        }
        self.invalidate(&address).await?;

        let outcome = ListOutcome::new(
            ListOutcomeKind::Added,
            format!("{} is now {} for this session", address, wanted),
        );
        log_list_change("add_to_session", &address, true, &outcome.message);

        Ok(outcome)
    }

    /// Drop a session entry
    pub async fn remove_from_session(&self, raw: &str) -> FirewallResult<ListOutcome> {
        let address = AddressSpec::normalize(raw);

        let removed = {
            let mut session = self.session.write().await;
            let before = session.len();
            session.retain(|entry| entry.address != address);
            session.len() < before
        };

        if !removed {
            return Ok(self.rejected(
                ListOutcomeKind::NotListed,
                format!("{} is not listed for this session", address),
            ));
        }

        self.invalidate(&address).await?;
        log_list_change("remove_from_session", &address, true, "removed");

        Ok(ListOutcome::new(
            ListOutcomeKind::Removed,
            format!("{} removed from session", address),
        ))
    }

    fn rejected(&self, kind: ListOutcomeKind, message: String) -> ListOutcome {
        let outcome = ListOutcome::new(kind, message);
        log_list_change("rejected", "-", false, &outcome.message);
        outcome
    }

    /// Static entries first, then session, then the durable store
    async fn find_uncached(&self, address: &str) -> FirewallResult<Option<ListEntry>> {
        if let Some(entry) = self.find_static(address).await {
            return Ok(Some(entry));
        }

        if let Some(entry) = self
            .session
            .read()
            .await
            .iter()
            .find(|entry| entry.address == address)
        {
            return Ok(Some(entry.clone()));
        }

        self.find_persistent(address).await
    }

    async fn find_outside_session(&self, address: &str) -> FirewallResult<Option<ListEntry>> {
        match self.find_static(address).await {
            Some(entry) => Ok(Some(entry)),
            None => self.find_persistent(address).await,
        }
    }

    async fn find_static(&self, address: &str) -> Option<ListEntry> {
        self.static_entries()
            .await
            .into_iter()
            .find(|entry| entry.address == address)
    }

    async fn find_persistent(&self, address: &str) -> FirewallResult<Option<ListEntry>> {
        match &self.persistence {
            Some(store) => store.find_by_address(address).await,
            None => Ok(None),
        }
    }

    async fn build_snapshot(&self) -> FirewallResult<Vec<ListEntry>> {
        let mut list = match &self.persistence {
            Some(store) => store.all().await?,
            None => Vec::new(),
        };

        list.extend(self.static_entries().await);
        list.extend(self.session.read().await.iter().cloned());

        Ok(list)
    }

    async fn insert(&self, whitelisted: bool, address: &str) -> FirewallResult<()> {
        match &self.persistence {
            Some(store) => {
                store.create(address, whitelisted).await?;
            }
            None => {
                let mut lists = self.static_lists.write().await;
                lists.remove_address(address);

                let item = StaticItem {
                    id: Uuid::new_v4(),
                    raw: address.to_string(),
                    created_at: self.clock.now(),
                };
                if whitelisted {
                    lists.whitelist.push(item);
                } else {
                    lists.blacklist.push(item);
                }
            }
        }

        self.invalidate(address).await
    }

    /// Delete an address from every source; `true` if anything was removed
    async fn delete(&self, address: &str) -> FirewallResult<bool> {
        let from_static = self.static_lists.write().await.remove_address(address);

        let from_session = {
            let mut session = self.session.write().await;
            let before = session.len();
            session.retain(|entry| entry.address != address);
            session.len() < before
        };

        let from_store = match &self.persistence {
            Some(store) => store.delete(address).await?,
            None => false,
        };

        self.invalidate(address).await?;

        Ok(from_static || from_session || from_store)
    }

    async fn invalidate(&self, address: &str) -> FirewallResult<()> {
        self.address_cache
            .forget(&hashed_key(IP_ADDRESS_NAMESPACE, address))
            .await?;
        self.snapshot_cache
            .forget(&hashed_key(IP_ADDRESS_LIST_NAMESPACE, "all"))
            .await
    }

    /// Expand the static lists; file items contribute one entry per line
    async fn static_entries(&self) -> Vec<ListEntry> {
        let (whitelist, blacklist) = {
            let lists = self.static_lists.read().await;
            (lists.whitelist.clone(), lists.blacklist.clone())
        };

        let mut entries = Vec::new();
        for item in &whitelist {
            expand_item(item, true, &mut entries).await;
        }
        for item in &blacklist {
            expand_item(item, false, &mut entries).await;
        }

        entries
    }
}

fn list_name(whitelisted: bool) -> &'static str {
    if whitelisted {
        "whitelist"
    } else {
        "blacklist"
    }
}

/// Expand one static item, reading files (and files of files) line by line
///
/// A missing or unreadable file contributes nothing.
async fn expand_item(item: &StaticItem, whitelisted: bool, out: &mut Vec<ListEntry>) {
    let mut pending = vec![(item.raw.clone(), 0usize)];

    while let Some((raw, depth)) = pending.pop() {
        let spec = AddressSpec::parse(&raw);

        if spec.is_valid() {
            let from_file = depth > 0;
            out.push(ListEntry {
                id: if from_file { Uuid::new_v4() } else { item.id },
                address: spec.to_string(),
                whitelisted,
                source: EntrySource::StaticConfig,
                created_at: item.created_at,
                origin: from_file.then(|| item.raw.clone()),
            });
            continue;
        }

        if depth >= MAX_FILE_DEPTH {
            tracing::warn!(item = %raw, origin = %item.raw, "static list files nest too deeply");
            continue;
        }

        match tokio::fs::read_to_string(&raw).await {
            Ok(content) => {
                let lines: Vec<&str> = content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .collect();

                for line in lines.into_iter().rev() {
                    pending.push((line.to_string(), depth + 1));
                }
            }
            Err(e) => {
                tracing::debug!(item = %raw, error = %e, "static list item is neither an address nor a readable file");
            }
        }
    }
}
