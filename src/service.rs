use std::net::IpAddr;
use std::sync::Arc;

use tracing::Instrument;

use crate::cache::{Cache, CacheBackend, MemoryCache, RedisCache};
use crate::config::{CacheDriver, PersistenceDriver, Settings};
use crate::core::{
    ActionSignal, AddressMatcher, AttackDetector, AttackRecord, AttackType, Classification,
    Classifier, ListEntry, ListOutcome, ListStore,
};
use crate::notifications::{LogNotifier, NotificationSink, WebhookNotifier};
use crate::persistence::{MemoryStore, PersistenceStore, RedisStore};
use crate::resolvers::{DnsResolver, GeoResolver, HostResolver, NetworkGeoResolver, NullGeoResolver};
use crate::utils::{create_request_span, log_firewall, Clock, FirewallResult, SystemClock};

/// Assembles a [`Firewall`] from settings and collaborators
///
/// Collaborators that are not supplied fall back to in-process defaults: a
/// memory cache, the static lists as the only store, the configured geo
/// table, system DNS and log notifications.
pub struct FirewallBuilder {
    settings: Settings,
    cache: Option<Arc<dyn CacheBackend>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    geo: Option<Arc<dyn GeoResolver>>,
    hosts: Option<Arc<dyn HostResolver>>,
    sink: Option<Arc<dyn NotificationSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl FirewallBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            cache: None,
            persistence: None,
            geo: None,
            hosts: None,
            sink: None,
            clock: None,
        }
    }

    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn geo_resolver(mut self, geo: Arc<dyn GeoResolver>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn host_resolver(mut self, hosts: Arc<dyn HostResolver>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Wire every component
    pub fn build(self) -> Firewall {
        let settings = self.settings;
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let backend: Arc<dyn CacheBackend> = match self.cache {
            Some(backend) => backend,
            None => Arc::new(MemoryCache::new(clock.clone())),
        };
        let cache = Cache::new(backend, settings.cache_ttl_seconds);

        let geo = match self.geo {
            Some(geo) => geo,
            None => default_geo_resolver(&settings),
        };
        let hosts: Arc<dyn HostResolver> = match self.hosts {
            Some(hosts) => hosts,
            None => Arc::new(DnsResolver::new()),
        };
        let sink: Arc<dyn NotificationSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(LogNotifier),
        };

        let store = Arc::new(ListStore::new(
            &settings,
            self.persistence,
            &cache,
            clock.clone(),
        ));
        let classifier = Arc::new(Classifier::new(
            &settings,
            store.clone(),
            AddressMatcher::new(hosts.clone()),
            geo,
        ));
        let detector = AttackDetector::new(
            &settings,
            classifier.clone(),
            hosts,
            sink,
            &cache,
            clock,
        );

        Firewall {
            settings,
            store,
            classifier,
            detector,
            cache,
        }
    }
}

fn default_geo_resolver(settings: &Settings) -> Arc<dyn GeoResolver> {
    if settings.geoip.networks.is_empty() {
        Arc::new(NullGeoResolver)
    } else {
        Arc::new(NetworkGeoResolver::from_config(&settings.geoip))
    }
}

/// IP and country firewall with attack detection
///
/// Every method is safe to call concurrently from request handlers; the only
/// shared mutable state lives in the cache and the list store.
pub struct Firewall {
    settings: Settings,
    store: Arc<ListStore>,
    classifier: Arc<Classifier>,
    detector: AttackDetector,
    cache: Cache,
}

impl Firewall {
    /// Start building a firewall from `settings`
    pub fn builder(settings: Settings) -> FirewallBuilder {
        FirewallBuilder::new(settings)
    }

    /// Creates a firewall with the backends selected in `settings.storage`
    ///
    /// # Arguments
    ///
    /// * `settings` - Loaded configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Firewall)` - When every configured backend is reachable
    /// * `Err(FirewallError)` - When a Redis backend or the webhook client cannot be created
    pub async fn from_settings(settings: Settings) -> FirewallResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let storage = settings.storage.clone();

        let mut builder = FirewallBuilder::new(settings.clone()).clock(clock.clone());

        if storage.cache == CacheDriver::Redis {
            let cache = RedisCache::new(&storage.redis_url, &storage.key_prefix).await?;
            builder = builder.cache(Arc::new(cache));
        }

        match storage.persistence {
            PersistenceDriver::Config => {}
            PersistenceDriver::Memory => {
                builder = builder.persistence(Arc::new(MemoryStore::new(clock.clone())));
            }
            PersistenceDriver::Redis => {
                let store =
                    RedisStore::new(&storage.redis_url, &storage.key_prefix, clock.clone()).await?;
                builder = builder.persistence(Arc::new(store));
            }
        }

        if !settings.notifications.webhooks.is_empty() {
            builder = builder.notification_sink(Arc::new(WebhookNotifier::new(&settings.notifications)?));
        }

        tracing::info!(
            cache = ?storage.cache,
            persistence = ?storage.persistence,
            "firewall backends initialized"
        );

        Ok(builder.build())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Which list `address` is in
    pub async fn classify(&self, address: &str) -> FirewallResult<Classification> {
        self.classifier.which_list(address).await
    }

    pub async fn is_blacklisted(&self, address: &str) -> FirewallResult<bool> {
        self.classifier.is_blacklisted(address).await
    }

    pub async fn is_whitelisted(&self, address: &str) -> FirewallResult<bool> {
        self.classifier.is_whitelisted(address).await
    }

    /// Put `address` on the blacklist; `force` moves it off the whitelist
    pub async fn blacklist(&self, address: &str, force: bool) -> FirewallResult<ListOutcome> {
        self.classifier.add_to_list(false, address, force).await
    }

    /// Put `address` on the whitelist; `force` moves it off the blacklist
    pub async fn whitelist(&self, address: &str, force: bool) -> FirewallResult<ListOutcome> {
        self.classifier.add_to_list(true, address, force).await
    }

    pub async fn remove(&self, address: &str) -> FirewallResult<ListOutcome> {
        self.classifier.remove(address).await
    }

    /// Exact entry for `address`, without range or country resolution
    pub async fn find(&self, address: &str) -> FirewallResult<Option<ListEntry>> {
        self.store.find(address).await
    }

    /// Every entry of every source
    pub async fn list_all(&self) -> FirewallResult<Vec<ListEntry>> {
        self.store.all().await
    }

    /// Remove every entry; returns how many were removed
    pub async fn clear(&self) -> FirewallResult<usize> {
        self.store.clear().await
    }

    pub async fn blacklist_on_session(&self, address: &str) -> FirewallResult<ListOutcome> {
        self.store.add_to_session(false, address).await
    }

    pub async fn whitelist_on_session(&self, address: &str) -> FirewallResult<ListOutcome> {
        self.store.add_to_session(true, address).await
    }

    pub async fn remove_from_session(&self, address: &str) -> FirewallResult<ListOutcome> {
        self.store.remove_from_session(address).await
    }

    /// Entries for a country code
    pub async fn all_by_country(&self, country: &str) -> FirewallResult<Vec<ListEntry>> {
        self.classifier.all_by_country(country).await
    }

    /// Country of `address` as seen by the geo resolver
    pub async fn country_of(&self, address: &str) -> Option<String> {
        self.classifier.country_of(address).await
    }

    /// Count a request from `address` and report whether it is attacking
    pub async fn is_being_attacked(&self, address: &str) -> FirewallResult<bool> {
        self.detector.is_being_attacked(address).await
    }

    /// Wait for attack notifications that are still being delivered
    pub async fn flush_notifications(&self) {
        self.detector.flush_notifications().await
    }

    /// Signal for `address` if it is currently over an attack threshold
    pub async fn response_to_attack(&self, address: &str) -> FirewallResult<Option<ActionSignal>> {
        self.detector.response_to_attack(address).await
    }

    /// Live attack record for an address or a country code
    pub async fn attack_record(
        &self,
        attack_type: AttackType,
        subject: &str,
    ) -> FirewallResult<Option<AttackRecord>> {
        self.detector.record(attack_type, subject).await
    }

    /// Signal for a blacklisted client
    pub fn block_access(&self) -> Option<ActionSignal> {
        ActionSignal::from_config(&self.settings.response)
    }

    /// Run every filter for one request
    ///
    /// Blacklisted clients get the block signal, attackers the attack signal,
    /// and in whitelist-only mode everybody else is redirected. `None` lets
    /// the request through.
    pub async fn check_request(&self, address: &str) -> FirewallResult<Option<ActionSignal>> {
        self.filter(address)
            .instrument(create_request_span(address))
            .await
    }

    async fn filter(&self, address: &str) -> FirewallResult<Option<ActionSignal>> {
        if self.is_blacklisted(address).await? {
            self.log(&format!("{} is blacklisted", address));
            return Ok(self.block_access());
        }

        if self.is_being_attacked(address).await? {
            return Ok(ActionSignal::from_config(&self.settings.attack.response));
        }

        if let Some(to) = &self.settings.redirect_non_whitelisted_to {
            if !self.is_whitelisted(address).await? {
                return Ok(Some(ActionSignal::redirect(to.clone())));
            }
        }

        Ok(None)
    }

    /// Drop every cached lookup, snapshot and attack record
    pub async fn flush_cache(&self) -> FirewallResult<()> {
        self.cache.flush().await
    }

    /// Write a firewall log line when logging is enabled
    pub fn log(&self, message: &str) {
        log_firewall(self.settings.enable_log, message);
    }

    /// Whether `address` is a literal IP address
    pub fn is_ip_address(address: &str) -> bool {
        address.trim().parse::<IpAddr>().is_ok()
    }
}
