use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use tracing::warn;

use crate::config::GeoIpConfig;

/// Maps a client address to a lowercase country code
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoResolver: Send + Sync {
    /// Country of `address`; `None` when unknown or unavailable
    async fn lookup(&self, address: &str) -> Option<String>;
}

/// Resolver used when no geolocation source is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGeoResolver;

#[async_trait]
impl GeoResolver for NullGeoResolver {
    async fn lookup(&self, _address: &str) -> Option<String> {
        None
    }
}

/// Table of networks and their countries; the most specific network wins
#[derive(Debug, Default, Clone)]
pub struct NetworkGeoResolver {
    networks: Vec<(IpNet, String)>,
}

impl NetworkGeoResolver {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from configuration, skipping networks that do not parse
    pub fn from_config(config: &GeoIpConfig) -> Self {
        let mut resolver = Self::new();

        for (network, country) in &config.networks {
            match network.parse::<IpNet>() {
                Ok(net) => resolver = resolver.with_network(net, country),
                Err(e) => warn!(network = %network, error = %e, "ignoring invalid geoip network"),
            }
        }

        resolver
    }

    /// Add a network
    pub fn with_network(mut self, network: IpNet, country: &str) -> Self {
        self.networks
            .push((network, country.trim().to_ascii_lowercase()));
        self
    }

    /// Number of networks in the table
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[async_trait]
impl GeoResolver for NetworkGeoResolver {
    async fn lookup(&self, address: &str) -> Option<String> {
        let ip: IpAddr = address.trim().parse().ok()?;

        self.networks
            .iter()
            .filter(|(net, _)| net.contains(&ip))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, country)| country.clone())
    }
}
