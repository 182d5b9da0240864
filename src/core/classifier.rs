use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::core::{AddressMatcher, AddressSpec, ListEntry, ListOutcome, ListStore};
use crate::resolvers::GeoResolver;
use crate::utils::{log_geo_unavailable, FirewallResult};

/// Resolved membership of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Whitelisted,
    Blacklisted,
    Unclassified,
}

impl Classification {
    /// Classification granted by an entry's `whitelisted` flag
    pub fn from_whitelisted(whitelisted: bool) -> Self {
        if whitelisted {
            Classification::Whitelisted
        } else {
            Classification::Blacklisted
        }
    }

    /// Whether the address is on either list
    pub fn is_listed(&self) -> bool {
        !matches!(self, Classification::Unclassified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Whitelisted => "whitelisted",
            Classification::Blacklisted => "blacklisted",
            Classification::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides which list an address belongs to
///
/// Resolution order, first hit wins:
///
/// 1. exact entry for the address
/// 2. `country:<code>` entry for the address's country, when country search is on
/// 3. first CIDR, range, wildcard or host entry covering the address, when
///    range search is on
pub struct Classifier {
    store: Arc<ListStore>,
    matcher: AddressMatcher,
    geo: Arc<dyn GeoResolver>,
    enable_range_search: bool,
    enable_country_search: bool,
}

impl Classifier {
    /// Create a classifier over `store`
    pub fn new(
        settings: &Settings,
        store: Arc<ListStore>,
        matcher: AddressMatcher,
        geo: Arc<dyn GeoResolver>,
    ) -> Self {
        Self {
            store,
            matcher,
            geo,
            enable_range_search: settings.enable_range_search,
            enable_country_search: settings.enable_country_search,
        }
    }

    /// The list store this classifier reads
    pub fn store(&self) -> &Arc<ListStore> {
        &self.store
    }

    /// Which list `address` is in
    pub async fn which_list(&self, address: &str) -> FirewallResult<Classification> {
        let classification = self
            .find_listing(address)
            .await?
            .map_or(Classification::Unclassified, |entry| entry.classification());

        metrics::increment_counter!(
            "firewall_classifications_total",
            "result" => classification.as_str()
        );

        Ok(classification)
    }

    /// The entry that decides the classification of `address`, if any
    pub async fn find_listing(&self, address: &str) -> FirewallResult<Option<ListEntry>> {
        if let Some(entry) = self.store.find(address).await? {
            return Ok(Some(entry));
        }

        if self.enable_country_search {
            if let Some(code) = self.country_of(address).await {
                if let Some(entry) = self.store.find(&format!("country:{}", code)).await? {
                    return Ok(Some(entry));
                }
            }
        }

        if self.enable_range_search {
            for entry in self.store.all().await? {
                let spec = entry.spec();
                let scanned = spec.is_range() || matches!(spec, AddressSpec::Host(_));

                if scanned && self.matcher.matches(address, &spec).await {
                    return Ok(Some(entry));
                }
            }
        }

        Ok(None)
    }

    pub async fn is_blacklisted(&self, address: &str) -> FirewallResult<bool> {
        Ok(self.which_list(address).await? == Classification::Blacklisted)
    }

    pub async fn is_whitelisted(&self, address: &str) -> FirewallResult<bool> {
        Ok(self.which_list(address).await? == Classification::Whitelisted)
    }

    /// Put `raw` on the whitelist or blacklist, moving it only when `force`
    /// is set
    pub async fn add_to_list(
        &self,
        whitelisted: bool,
        raw: &str,
        force: bool,
    ) -> FirewallResult<ListOutcome> {
        let spec = AddressSpec::parse(raw);
        if !spec.is_valid() {
            return Ok(ListOutcome::invalid_address(raw));
        }

        let listed = self.which_list(&spec.to_string()).await?;
        self.store.add(whitelisted, raw, force, listed).await
    }

    /// Take `raw` off the lists
    pub async fn remove(&self, raw: &str) -> FirewallResult<ListOutcome> {
        self.store.remove(raw).await
    }

    /// Country code of an IP address; logs when no answer is available
    pub async fn country_of(&self, address: &str) -> Option<String> {
        if address.trim().parse::<IpAddr>().is_err() {
            return None;
        }

        let code = self.geo.lookup(address.trim()).await;
        if code.is_none() {
            log_geo_unavailable(address);
        }

        code.map(|code| code.to_ascii_lowercase())
    }

    /// Entries for a country: its `country:` token plus every single address
    /// located there
    pub async fn all_by_country(&self, country: &str) -> FirewallResult<Vec<ListEntry>> {
        let code = country.trim().to_ascii_lowercase();
        let token = format!("country:{}", code);
        let mut entries = Vec::new();

        for entry in self.store.all().await? {
            if entry.address == token {
                entries.push(entry);
                continue;
            }

            if entry.address.parse::<IpAddr>().is_ok() {
                let located = self.geo.lookup(&entry.address).await;
                if located.is_some_and(|located| located.eq_ignore_ascii_case(&code)) {
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }
}
