use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use tracing::debug;

/// Forward and reverse DNS
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Addresses of `host`; empty when it does not resolve
    async fn resolve(&self, host: &str) -> Vec<IpAddr>;

    /// Host name of `ip`, if it has one
    async fn reverse(&self, ip: IpAddr) -> Option<String>;
}

/// DNS resolver backed by hickory
#[derive(Clone)]
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    /// Create a resolver from the system configuration, falling back to
    /// hickory's defaults when it cannot be read
    pub fn new() -> Self {
        let resolver = TokioResolver::builder_tokio()
            .map(|builder| builder.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });

        Self { resolver }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => lookup.iter().collect(),
            Err(e) => {
                debug!(host = %host, error = %e, "host lookup failed");
                Vec::new()
            }
        }
    }

    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Err(e) => {
                debug!(ip = %ip, error = %e, "reverse lookup failed");
                None
            }
        }
    }
}
