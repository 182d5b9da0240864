use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::cache::{hashed_key, Cache};
use crate::config::{AttackConfig, AttackTypeConfig, NotificationConfig, Settings};
use crate::core::{ActionSignal, AddressSpec, Classifier};
use crate::notifications::NotificationSink;
use crate::resolvers::HostResolver;
use crate::utils::{
    log_attack_detected, log_firewall, log_notification_failure, Clock, FirewallResult,
};

/// Dimension a request counter is kept for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackType {
    /// One counter per client address
    Address,
    /// One counter per client country
    Country,
}

impl AttackType {
    pub const ALL: [AttackType; 2] = [AttackType::Address, AttackType::Country];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::Address => "address",
            AttackType::Country => "country",
        }
    }
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request counter of one tracked subject inside its current window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRecord {
    /// Tracked dimension
    pub attack_type: AttackType,
    /// Cache key of this record
    pub key: String,
    /// Tracked value: the client address or its country code
    pub subject: String,
    /// Client address of the latest request
    pub subject_address: String,
    /// Requests seen in this window
    pub request_count: u64,
    /// Start of the window
    pub first_request_at: DateTime<Utc>,
    /// Start of the window, moved forward every time the subject triggers
    pub last_request_at: DateTime<Utc>,
    /// The subject was put on the blacklist during this window
    pub is_blacklisted: bool,
    /// Notifications went out during this window
    pub was_notified: bool,
    /// Country of the client, when known
    pub country_code: Option<String>,
    /// Reverse DNS name of the client, when known
    pub hostname: Option<String>,
}

impl AttackRecord {
    fn fresh(
        attack_type: AttackType,
        key: String,
        subject: String,
        address: &str,
        country_code: Option<String>,
        hostname: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            attack_type,
            key,
            subject,
            subject_address: address.to_string(),
            request_count: 0,
            first_request_at: now,
            last_request_at: now,
            is_blacklisted: false,
            was_notified: false,
            country_code,
            hostname,
        }
    }

    /// Whether the window has been idle for longer than `window_seconds`
    pub fn is_expired(&self, now: DateTime<Utc>, window_seconds: i64) -> bool {
        (now - self.last_request_at).num_seconds() > window_seconds
    }

    /// List item to blacklist when this subject attacks
    pub fn list_target(&self) -> String {
        match self.attack_type {
            AttackType::Address => self.subject_address.clone(),
            AttackType::Country => format!("country:{}", self.subject),
        }
    }
}

/// Sliding-window request counters per address and per country
///
/// Each enabled dimension keeps one [`AttackRecord`] per subject in the
/// shared cache. A record is loaded, incremented and stored back without any
/// locking, so concurrent requests from one subject may lose increments; the
/// detector is a best-effort limiter, not an exact counter.
///
/// Notifications are delivered on background tasks, so a slow channel never
/// holds up the request that triggered it.
pub struct AttackDetector {
    config: AttackConfig,
    notifications: NotificationConfig,
    enable_log: bool,
    classifier: Arc<Classifier>,
    hosts: Arc<dyn HostResolver>,
    sink: Arc<dyn NotificationSink>,
    cache: Cache,
    clock: Arc<dyn Clock>,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

impl AttackDetector {
    /// Creates a new attack detector
    ///
    /// # Arguments
    ///
    /// * `settings` - Thresholds, actions and notification channels
    /// * `classifier` - Used for the whitelist exemption and to blacklist offenders
    /// * `hosts` - Reverse DNS for record enrichment
    /// * `sink` - Notification delivery
    /// * `cache` - Shared cache; records expire with their window
    /// * `clock` - Time source for windows
    pub fn new(
        settings: &Settings,
        classifier: Arc<Classifier>,
        hosts: Arc<dyn HostResolver>,
        sink: Arc<dyn NotificationSink>,
        cache: &Cache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: settings.attack.clone(),
            notifications: settings.notifications.clone(),
            enable_log: settings.enable_log,
            classifier,
            hosts,
            sink,
            cache: cache.clone(),
            clock,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    /// Whether any dimension is tracked
    pub fn is_enabled(&self) -> bool {
        !self.enabled_types().is_empty()
    }

    pub fn type_config(&self, attack_type: AttackType) -> &AttackTypeConfig {
        match attack_type {
            AttackType::Address => &self.config.address,
            AttackType::Country => &self.config.country,
        }
    }

    /// Count one request from `address` and report whether it is attacking
    ///
    /// Every enabled dimension is evaluated; the answer is `true` when any of
    /// them is over its threshold. Offenders are renewed, optionally
    /// blacklisted, notified about once per window and logged.
    pub async fn is_being_attacked(&self, address: &str) -> FirewallResult<bool> {
        let types = self.enabled_types();
        if types.is_empty() {
            return Ok(false);
        }

        let address = AddressSpec::normalize(address);
        let country = self.country_for(&types, &address).await;

        let triggered = try_join_all(
            types
                .iter()
                .map(|attack_type| self.observe(*attack_type, &address, country.as_deref())),
        )
        .await?;

        Ok(triggered.into_iter().any(|attacked| attacked))
    }

    /// Signal for a client that is currently over a threshold
    ///
    /// Reads the stored records without counting a request.
    pub async fn response_to_attack(&self, address: &str) -> FirewallResult<Option<ActionSignal>> {
        let types = self.enabled_types();
        let address = AddressSpec::normalize(address);
        let country = self.country_for(&types, &address).await;

        for attack_type in types {
            let Some(subject) = subject_of(attack_type, &address, country.as_deref()) else {
                continue;
            };

            if let Some(record) = self.record(attack_type, &subject).await? {
                if self.is_attack(&record).await? {
                    return Ok(ActionSignal::from_config(&self.config.response));
                }
            }
        }

        Ok(None)
    }

    /// Live record for a subject: an address, or a country code
    pub async fn record(
        &self,
        attack_type: AttackType,
        subject: &str,
    ) -> FirewallResult<Option<AttackRecord>> {
        let key = self.key_for(attack_type, subject);
        let window_seconds = self.type_config(attack_type).window_seconds;

        let record = self.window(attack_type).get::<AttackRecord>(&key).await?;

        Ok(record.filter(|record| !record.is_expired(self.clock.now(), window_seconds)))
    }

    fn enabled_types(&self) -> Vec<AttackType> {
        AttackType::ALL
            .into_iter()
            .filter(|attack_type| self.type_config(*attack_type).enabled)
            .collect()
    }

    fn key_for(&self, attack_type: AttackType, subject: &str) -> String {
        hashed_key(
            &format!("{}.{}", self.config.cache_key_prefix, attack_type),
            subject,
        )
    }

    /// Cache handle whose TTL is the window of `attack_type`
    fn window(&self, attack_type: AttackType) -> Cache {
        self.cache
            .with_ttl(self.type_config(attack_type).window_seconds)
    }

    async fn country_for(&self, types: &[AttackType], address: &str) -> Option<String> {
        if types.contains(&AttackType::Country) {
            self.classifier.country_of(address).await
        } else {
            None
        }
    }

    async fn observe(
        &self,
        attack_type: AttackType,
        address: &str,
        country: Option<&str>,
    ) -> FirewallResult<bool> {
        // Without a country the dimension is skipped for this request.
        let Some(subject) = subject_of(attack_type, address, country) else {
            return Ok(false);
        };

        let mut record = self.load(attack_type, subject, address, country).await?;
        record.subject_address = address.to_string();
        record.request_count += 1;
        self.save(&record).await?;

        if !self.is_attack(&record).await? {
            return Ok(false);
        }

        self.take_action(record).await?;

        Ok(true)
    }

    async fn load(
        &self,
        attack_type: AttackType,
        subject: String,
        address: &str,
        country: Option<&str>,
    ) -> FirewallResult<AttackRecord> {
        if let Some(record) = self.record(attack_type, &subject).await? {
            return Ok(record);
        }

        let hostname = match address.parse::<IpAddr>() {
            Ok(ip) => self.hosts.reverse(ip).await,
            Err(_) => None,
        };

        Ok(AttackRecord::fresh(
            attack_type,
            self.key_for(attack_type, &subject),
            subject,
            address,
            country.map(str::to_string),
            hostname,
            self.clock.now(),
        ))
    }

    async fn save(&self, record: &AttackRecord) -> FirewallResult<()> {
        self.window(record.attack_type)
            .put(&record.key, record)
            .await
    }

    /// Over the threshold and not exempt as a whitelisted client
    async fn is_attack(&self, record: &AttackRecord) -> FirewallResult<bool> {
        let config = self.type_config(record.attack_type);

        if record.request_count <= config.max_requests {
            return Ok(false);
        }

        if config.blacklist_whitelisted {
            return Ok(true);
        }

        Ok(!self
            .classifier
            .is_whitelisted(&record.subject_address)
            .await?)
    }

    async fn take_action(&self, mut record: AttackRecord) -> FirewallResult<()> {
        record.last_request_at = self.clock.now();
        self.save(&record).await?;

        self.blacklist(&mut record).await?;
        self.notify(&mut record).await?;

        log_attack_detected(&record, self.type_config(record.attack_type).max_requests);
        log_firewall(
            self.enable_log,
            &format!(
                "Attacker detected - IP: {} - Request count: {}",
                record.subject_address, record.request_count
            ),
        );
        metrics::increment_counter!(
            "firewall_attacks_detected_total",
            "type" => record.attack_type.as_str()
        );

        Ok(())
    }

    async fn blacklist(&self, record: &mut AttackRecord) -> FirewallResult<()> {
        let config = self.type_config(record.attack_type);

        if record.is_blacklisted || !(config.blacklist_unknown || config.blacklist_whitelisted) {
            return Ok(());
        }

        let outcome = self
            .classifier
            .add_to_list(false, &record.list_target(), config.blacklist_whitelisted)
            .await?;
        tracing::debug!(target_item = %record.list_target(), outcome = %outcome, "attacker blacklist attempt");

        record.is_blacklisted = true;
        self.save(record).await
    }

    async fn notify(&self, record: &mut AttackRecord) -> FirewallResult<()> {
        if record.was_notified || !self.notifications.enabled {
            return Ok(());
        }

        record.was_notified = true;
        self.save(record).await?;

        let delivery = tokio::spawn(deliver(
            self.sink.clone(),
            record.clone(),
            self.notifications.channels.clone(),
        ));

        let mut deliveries = self
            .deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        deliveries.retain(|handle| !handle.is_finished());
        deliveries.push(delivery);

        Ok(())
    }

    /// Wait until every notification sent so far has been delivered or failed
    pub async fn flush_notifications(&self) {
        let pending = std::mem::take(
            &mut *self
                .deliveries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "notification task did not complete");
            }
        }
    }
}

async fn deliver(sink: Arc<dyn NotificationSink>, record: AttackRecord, channels: Vec<String>) {
    let (sink, record) = (&sink, &record);
    let deliveries = channels
        .iter()
        .map(|channel| async move { (channel, sink.notify(record, channel).await) });

    for (channel, result) in join_all(deliveries).await {
        match result {
            Ok(()) => {
                metrics::increment_counter!("firewall_notifications_total", "outcome" => "sent");
            }
            Err(e) => {
                log_notification_failure(channel, &e);
                metrics::increment_counter!("firewall_notifications_total", "outcome" => "failed");
            }
        }
    }
}

fn subject_of(attack_type: AttackType, address: &str, country: Option<&str>) -> Option<String> {
    match attack_type {
        AttackType::Address => Some(address.to_string()),
        AttackType::Country => country.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::core::{AddressMatcher, ListStore};
    use crate::notifications::MockNotificationSink;
    use crate::resolvers::{MockGeoResolver, MockHostResolver};
    use crate::utils::{FirewallError, MockClock};

    struct Harness {
        clock: Arc<MockClock>,
        classifier: Arc<Classifier>,
        detector: AttackDetector,
    }

    fn harness(settings: Settings, geo: MockGeoResolver, sink: MockNotificationSink) -> Harness {
        let clock = Arc::new(MockClock::default());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let cache = Cache::new(Arc::new(MemoryCache::new(dyn_clock.clone())), 0);

        let mut hosts = MockHostResolver::new();
        hosts.expect_reverse().returning(|_| None);
        let hosts: Arc<dyn HostResolver> = Arc::new(hosts);

        let store = Arc::new(ListStore::new(&settings, None, &cache, dyn_clock.clone()));
        let classifier = Arc::new(Classifier::new(
            &settings,
            store,
            AddressMatcher::new(hosts.clone()),
            Arc::new(geo),
        ));
        let detector = AttackDetector::new(
            &settings,
            classifier.clone(),
            hosts,
            Arc::new(sink),
            &cache,
            dyn_clock,
        );

        Harness {
            clock,
            classifier,
            detector,
        }
    }

    fn address_settings(max_requests: u64) -> Settings {
        let mut settings = Settings::default();
        settings.attack.address.enabled = true;
        settings.attack.address.max_requests = max_requests;
        settings.attack.address.window_seconds = 60;
        settings
    }

    #[tokio::test]
    async fn test_threshold_and_window_reset() -> FirewallResult<()> {
        let h = harness(address_settings(2), MockGeoResolver::new(), MockNotificationSink::new());

        assert!(!h.detector.is_being_attacked("10.0.0.1").await?);
        assert!(!h.detector.is_being_attacked("10.0.0.1").await?);
        assert!(h.detector.is_being_attacked("10.0.0.1").await?);
        assert!(!h.detector.is_being_attacked("10.0.0.2").await?);

        h.clock.advance_secs(61);
        assert!(!h.detector.is_being_attacked("10.0.0.1").await?);

        let record = h
            .detector
            .record(AttackType::Address, "10.0.0.1")
            .await?
            .expect("record");
        assert_eq!(record.request_count, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_notifies_once_per_channel_per_window() -> FirewallResult<()> {
        let mut settings = address_settings(1);
        settings.notifications.enabled = true;
        settings.notifications.channels = vec!["mail".to_string(), "slack".to_string()];

        let mut sink = MockNotificationSink::new();
        sink.expect_notify()
            .withf(|record, channel| record.subject_address == "10.0.0.1" && channel == "mail")
            .times(1)
            .returning(|_, _| Ok(()));
        sink.expect_notify()
            .withf(|_, channel| channel == "slack")
            .times(1)
            .returning(|_, _| Ok(()));

        let h = harness(settings, MockGeoResolver::new(), sink);
        for _ in 0..6 {
            h.detector.is_being_attacked("10.0.0.1").await?;
        }
        h.detector.flush_notifications().await;

        let record = h
            .detector
            .record(AttackType::Address, "10.0.0.1")
            .await?
            .expect("record");
        assert!(record.was_notified);
        assert_eq!(record.request_count, 6);

        Ok(())
    }

    #[tokio::test]
    async fn test_notification_failures_are_swallowed() -> FirewallResult<()> {
        let mut settings = address_settings(0);
        settings.notifications.enabled = true;
        settings.notifications.channels = vec!["webhook".to_string()];

        let mut sink = MockNotificationSink::new();
        sink.expect_notify().times(1).returning(|_, channel| {
            Err(FirewallError::NotificationDelivery {
                channel: channel.to_string(),
                reason: "connection refused".to_string(),
            })
        });

        let h = harness(settings, MockGeoResolver::new(), sink);
        assert!(h.detector.is_being_attacked("10.0.0.1").await?);
        h.detector.flush_notifications().await;

        Ok(())
    }

    #[tokio::test]
    async fn test_blacklists_unknown_offenders() -> FirewallResult<()> {
        let mut settings = address_settings(2);
        settings.attack.address.blacklist_unknown = true;

        let h = harness(settings, MockGeoResolver::new(), MockNotificationSink::new());
        for _ in 0..3 {
            h.detector.is_being_attacked("10.0.0.9").await?;
        }

        assert!(h.classifier.is_blacklisted("10.0.0.9").await?);
        let record = h
            .detector
            .record(AttackType::Address, "10.0.0.9")
            .await?
            .expect("record");
        assert!(record.is_blacklisted);

        Ok(())
    }

    #[tokio::test]
    async fn test_whitelisted_clients_are_exempt_unless_configured() -> FirewallResult<()> {
        let mut settings = address_settings(1);
        settings.whitelist = vec!["10.0.0.7".to_string()];

        let exempt = harness(settings.clone(), MockGeoResolver::new(), MockNotificationSink::new());
        for _ in 0..5 {
            assert!(!exempt.detector.is_being_attacked("10.0.0.7").await?);
        }

        settings.attack.address.blacklist_whitelisted = true;
        let strict = harness(settings, MockGeoResolver::new(), MockNotificationSink::new());
        strict.detector.is_being_attacked("10.0.0.7").await?;
        assert!(strict.detector.is_being_attacked("10.0.0.7").await?);

        // Static whitelist items are moved, not left in both lists.
        assert!(strict.classifier.is_blacklisted("10.0.0.7").await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_country_dimension_skipped_without_geo() -> FirewallResult<()> {
        let mut settings = Settings::default();
        settings.attack.country.enabled = true;
        settings.attack.country.max_requests = 1;

        let mut geo = MockGeoResolver::new();
        geo.expect_lookup().returning(|address| match address {
            "8.8.8.8" | "8.8.4.4" => Some("us".to_string()),
            _ => None,
        });

        let h = harness(settings, geo, MockNotificationSink::new());

        assert!(!h.detector.is_being_attacked("8.8.8.8").await?);
        assert!(h.detector.is_being_attacked("8.8.4.4").await?);

        for _ in 0..3 {
            assert!(!h.detector.is_being_attacked("192.0.2.1").await?);
        }

        let record = h
            .detector
            .record(AttackType::Country, "us")
            .await?
            .expect("country record");
        assert_eq!(record.request_count, 2);
        assert_eq!(record.list_target(), "country:us");

        Ok(())
    }

    #[tokio::test]
    async fn test_response_to_attack_does_not_count() -> FirewallResult<()> {
        let mut settings = address_settings(1);
        settings.attack.response.code = 429;

        let h = harness(settings, MockGeoResolver::new(), MockNotificationSink::new());

        assert_eq!(h.detector.response_to_attack("10.0.0.1").await?, None);
        h.detector.is_being_attacked("10.0.0.1").await?;
        assert_eq!(h.detector.response_to_attack("10.0.0.1").await?, None);

        h.detector.is_being_attacked("10.0.0.1").await?;
        let signal = h.detector.response_to_attack("10.0.0.1").await?;
        assert_eq!(signal.map(|signal| signal.status_code()), Some(429));

        let record = h
            .detector
            .record(AttackType::Address, "10.0.0.1")
            .await?
            .expect("record");
        assert_eq!(record.request_count, 2);

        Ok(())
    }
}
