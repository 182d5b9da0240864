use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use ipnet::Ipv4Net;

use crate::core::countries;
use crate::resolvers::HostResolver;

/// A parsed list address
///
/// Parsing is total: anything that does not match a structured form is kept
/// as an `Exact` string, and [`AddressSpec::is_valid`] decides whether it may
/// be stored. IPv6 literals are exact-match only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    /// A single address, or an unrecognised token
    Exact(String),
    /// `a.b.c.d/len` or `a.b.c.d/m.m.m.m`
    Cidr(Ipv4Net),
    /// `172.17.*.*`; `None` marks a `*` segment
    Wildcard([Option<u8>; 4]),
    /// `10.0.0.1-10.0.0.255`, both ends inclusive
    Range { start: Ipv4Addr, end: Ipv4Addr },
    /// `host:example.com`, resolved when matched
    Host(String),
    /// `country:br`
    Country(String),
}

impl AddressSpec {
    /// Parse a raw list item
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();

        if let Some(code) = lower.strip_prefix("country:") {
            return AddressSpec::Country(code.trim().to_string());
        }

        if let Some(host) = lower.strip_prefix("host:") {
            return AddressSpec::Host(host.trim().trim_end_matches('.').to_string());
        }

        if let Some((network, mask)) = trimmed.split_once('/') {
            if let Some(net) = parse_cidr(network, mask) {
                return AddressSpec::Cidr(net);
            }
        }

        if let Some((start, end)) = trimmed.split_once('-') {
            if let (Ok(start), Ok(end)) = (
                start.trim().parse::<Ipv4Addr>(),
                end.trim().parse::<Ipv4Addr>(),
            ) {
                if start <= end {
                    return AddressSpec::Range { start, end };
                }
            }
        }

        if trimmed.contains('*') {
            if let Some(segments) = parse_wildcard(trimmed) {
                return AddressSpec::Wildcard(segments);
            }
        }

        match trimmed.parse::<IpAddr>() {
            Ok(ip) => AddressSpec::Exact(ip.to_string()),
            Err(_) => AddressSpec::Exact(trimmed.to_string()),
        }
    }

    /// Canonical text of a raw item; two items denote the same entry iff
    /// their normalized forms are equal
    pub fn normalize(raw: &str) -> String {
        Self::parse(raw).to_string()
    }

    /// Whether the item may be stored in a list
    pub fn is_valid(&self) -> bool {
        match self {
            AddressSpec::Exact(value) => value.parse::<IpAddr>().is_ok(),
            AddressSpec::Cidr(_) | AddressSpec::Wildcard(_) | AddressSpec::Range { .. } => true,
            AddressSpec::Host(host) => is_valid_hostname(host),
            AddressSpec::Country(code) => countries::is_known(code),
        }
    }

    /// Whether the item covers more than one address and needs a scan
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            AddressSpec::Cidr(_) | AddressSpec::Wildcard(_) | AddressSpec::Range { .. }
        )
    }

    /// Country code of a `country:` item
    pub fn country_code(&self) -> Option<&str> {
        match self {
            AddressSpec::Country(code) => Some(code),
            _ => None,
        }
    }

    /// Test an IPv4 address against a CIDR, range or wildcard item
    pub fn contains_ipv4(&self, candidate: Ipv4Addr) -> bool {
        let candidate_bits = u32::from(candidate);

        match self {
            AddressSpec::Cidr(net) => {
                let mask = u32::from(net.netmask());
                (candidate_bits & mask) == (u32::from(net.addr()) & mask)
            }
            AddressSpec::Range { start, end } => {
                u32::from(*start) <= candidate_bits && candidate_bits <= u32::from(*end)
            }
            AddressSpec::Wildcard(segments) => segments
                .iter()
                .zip(candidate.octets())
                .all(|(segment, octet)| segment.map_or(true, |literal| literal == octet)),
            _ => false,
        }
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpec::Exact(value) => write!(f, "{}", value),
            AddressSpec::Cidr(net) => write!(f, "{}", net),
            AddressSpec::Wildcard(segments) => {
                let parts: Vec<String> = segments
                    .iter()
                    .map(|segment| segment.map_or_else(|| "*".to_string(), |o| o.to_string()))
                    .collect();
                write!(f, "{}", parts.join("."))
            }
            AddressSpec::Range { start, end } => write!(f, "{}-{}", start, end),
            AddressSpec::Host(host) => write!(f, "host:{}", host),
            AddressSpec::Country(code) => write!(f, "country:{}", code),
        }
    }
}

fn parse_cidr(network: &str, mask: &str) -> Option<Ipv4Net> {
    let network: Ipv4Addr = network.trim().parse().ok()?;
    let mask = mask.trim();

    let prefix_len = match mask.parse::<u8>() {
        Ok(len) => len,
        Err(_) => netmask_prefix_len(mask.parse().ok()?)?,
    };

    Ipv4Net::new(network, prefix_len).ok()
}

/// Prefix length of a dotted netmask; `None` for non-contiguous masks
fn netmask_prefix_len(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let ones = bits.leading_ones();

    (ones + bits.trailing_zeros() == 32).then_some(ones as u8)
}

fn parse_wildcard(pattern: &str) -> Option<[Option<u8>; 4]> {
    let parts: Vec<&str> = pattern.split('.').collect();
    if parts.len() != 4 {
        return None;
    }

    let mut segments = [None; 4];
    for (segment, part) in segments.iter_mut().zip(parts) {
        *segment = match part.trim() {
            "*" => None,
            literal => Some(literal.parse::<u8>().ok()?),
        };
    }

    Some(segments)
}

fn is_valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Tests client addresses against list items
#[derive(Clone)]
pub struct AddressMatcher {
    hosts: Arc<dyn HostResolver>,
}

impl AddressMatcher {
    /// Create a matcher resolving `host:` items through `hosts`
    pub fn new(hosts: Arc<dyn HostResolver>) -> Self {
        Self { hosts }
    }

    /// Parse a raw list item
    pub fn parse(&self, raw: &str) -> AddressSpec {
        AddressSpec::parse(raw)
    }

    /// Whether `candidate` is covered by `spec`
    ///
    /// Country items never match a raw address here; they are reached through
    /// the geo lookup in the classifier.
    pub async fn matches(&self, candidate: &str, spec: &AddressSpec) -> bool {
        match spec {
            AddressSpec::Exact(value) => AddressSpec::normalize(candidate) == *value,
            AddressSpec::Host(host) => match candidate.trim().parse::<IpAddr>() {
                Ok(ip) => self.hosts.resolve(host).await.contains(&ip),
                Err(_) => false,
            },
            AddressSpec::Cidr(_) | AddressSpec::Wildcard(_) | AddressSpec::Range { .. } => {
                match candidate.trim().parse::<Ipv4Addr>() {
                    Ok(ip) => spec.contains_ipv4(ip),
                    Err(_) => false,
                }
            }
            AddressSpec::Country(_) => false,
        }
    }
}
