#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ip_firewall::core::AttackRecord;
use ip_firewall::notifications::NotificationSink;
use ip_firewall::resolvers::{GeoResolver, HostResolver};
use ip_firewall::utils::{Clock, FirewallError, FirewallResult, MockClock};
use ip_firewall::{Firewall, Settings};

/// Generate a random IPv4 address for testing
pub fn random_ip() -> String {
    format!(
        "{}.{}.{}.{}",
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>()
    )
}

/// Host resolver answering from a fixed table
#[derive(Default)]
pub struct StubHosts {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StubHosts {
    pub fn with(mut self, host: &str, ip: &str) -> Self {
        let ip = ip.parse().expect("stub ip");
        self.hosts.entry(host.to_string()).or_default().push(ip);
        self
    }
}

#[async_trait]
impl HostResolver for StubHosts {
    async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        self.hosts.get(host).cloned().unwrap_or_default()
    }

    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        self.hosts
            .iter()
            .find(|(_, ips)| ips.contains(&ip))
            .map(|(host, _)| host.clone())
    }
}

/// Geo resolver answering from a fixed table
#[derive(Default)]
pub struct StubGeo {
    countries: HashMap<String, String>,
}

impl StubGeo {
    pub fn with(mut self, address: &str, country: &str) -> Self {
        self.countries.insert(address.to_string(), country.to_string());
        self
    }
}

#[async_trait]
impl GeoResolver for StubGeo {
    async fn lookup(&self, address: &str) -> Option<String> {
        self.countries.get(address).cloned()
    }
}

/// Notification sink that remembers every delivery
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<(String, String)> {
        self.delivered.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, record: &AttackRecord, channel: &str) -> FirewallResult<()> {
        self.delivered
            .lock()
            .expect("sink lock")
            .push((record.subject_address.clone(), channel.to_string()));

        if self.fail {
            return Err(FirewallError::NotificationDelivery {
                channel: channel.to_string(),
                reason: "stub failure".to_string(),
            });
        }

        Ok(())
    }
}

/// Everything a test needs to drive a firewall
pub struct TestFirewall {
    pub firewall: Firewall,
    pub clock: Arc<MockClock>,
    pub sink: Arc<RecordingSink>,
}

/// Build a firewall with stub collaborators and a frozen clock
pub fn build(settings: Settings, geo: StubGeo, hosts: StubHosts) -> TestFirewall {
    build_with_sink(settings, geo, hosts, RecordingSink::default())
}

pub fn build_with_sink(
    settings: Settings,
    geo: StubGeo,
    hosts: StubHosts,
    sink: RecordingSink,
) -> TestFirewall {
    let clock = Arc::new(MockClock::default());
    let sink = Arc::new(sink);

    let firewall = Firewall::builder(settings)
        .clock(clock.clone() as Arc<dyn Clock>)
        .geo_resolver(Arc::new(geo))
        .host_resolver(Arc::new(hosts))
        .notification_sink(sink.clone())
        .build();

    TestFirewall {
        firewall,
        clock,
        sink,
    }
}

/// Firewall over default settings and empty stubs
pub fn plain(settings: Settings) -> TestFirewall {
    build(settings, StubGeo::default(), StubHosts::default())
}
