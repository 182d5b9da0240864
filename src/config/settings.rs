use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::env;

/// Configuration settings for the firewall
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How long single-address lookups stay cached, in seconds (0 disables)
    pub cache_ttl_seconds: i64,
    /// How long the merged list snapshot stays cached, in seconds (0 disables)
    pub list_snapshot_ttl_seconds: i64,
    /// Scan CIDR, range, wildcard and host entries when no exact entry matches
    pub enable_range_search: bool,
    /// Resolve the client's country and look up `country:<code>` entries
    pub enable_country_search: bool,
    /// Write the firewall's own log lines
    pub enable_log: bool,
    /// Statically configured whitelist: addresses, specs or file paths
    pub whitelist: Vec<String>,
    /// Statically configured blacklist: addresses, specs or file paths
    pub blacklist: Vec<String>,
    /// Redirect every client that is not whitelisted to this location
    pub redirect_non_whitelisted_to: Option<String>,
    /// Response for blacklisted clients
    pub response: ResponseConfig,
    /// Cache and persistence backends
    pub storage: StorageConfig,
    /// Attack detection
    pub attack: AttackConfig,
    /// Attack notifications
    pub notifications: NotificationConfig,
    /// Built-in geolocation table
    pub geoip: GeoIpConfig,
    /// Prometheus exporter used by the binary
    pub metrics: MetricsConfig,
}

/// How the host should answer a blocked request
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// HTTP status code; 200 means "do not block"
    pub code: u16,
    /// Body of the response
    pub message: Option<String>,
    /// Redirect target instead of a plain response
    pub redirect_to: Option<String>,
    /// Abort the request instead of rendering a response
    pub abort: bool,
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
    Memory,
    Redis,
}

/// Where entries added at runtime are stored
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceDriver {
    /// Runtime additions go to the in-process static lists
    Config,
    /// In-process store that behaves like a database table
    Memory,
    /// Redis hash shared between processes
    Redis,
}

/// Storage configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Cache backend
    pub cache: CacheDriver,
    /// Durable list backend
    pub persistence: PersistenceDriver,
    /// Redis connection URL
    pub redis_url: String,
    /// Namespace for every Redis key
    pub key_prefix: String,
}

/// Attack detection configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// Salt mixed into every hashed attack key
    pub cache_key_prefix: String,
    /// Per-address tracking
    #[serde(
        default = "AttackTypeConfig::address_defaults",
        deserialize_with = "address_over_defaults"
    )]
    pub address: AttackTypeConfig,
    /// Per-country tracking
    #[serde(
        default = "AttackTypeConfig::country_defaults",
        deserialize_with = "country_over_defaults"
    )]
    pub country: AttackTypeConfig,
    /// Signal returned to the host when an attack is detected
    pub response: ResponseConfig,
}

/// Thresholds and actions for one tracked dimension
///
/// Each dimension has its own defaults, so a block that sets only some
/// fields is completed from the defaults of the dimension it belongs to.
#[derive(Debug, Clone)]
pub struct AttackTypeConfig {
    /// Track this dimension at all
    pub enabled: bool,
    /// Requests allowed inside one window
    pub max_requests: u64,
    /// Idle time after which the window resets, in seconds
    pub window_seconds: i64,
    /// Blacklist offenders that are not listed anywhere
    pub blacklist_unknown: bool,
    /// Blacklist offenders even when they are whitelisted
    pub blacklist_whitelisted: bool,
}

/// An `attack.address` or `attack.country` block as written
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AttackTypeOverrides {
    enabled: Option<bool>,
    max_requests: Option<u64>,
    window_seconds: Option<i64>,
    blacklist_unknown: Option<bool>,
    blacklist_whitelisted: Option<bool>,
}

impl AttackTypeOverrides {
    fn over(self, base: AttackTypeConfig) -> AttackTypeConfig {
        AttackTypeConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            max_requests: self.max_requests.unwrap_or(base.max_requests),
            window_seconds: self.window_seconds.unwrap_or(base.window_seconds),
            blacklist_unknown: self.blacklist_unknown.unwrap_or(base.blacklist_unknown),
            blacklist_whitelisted: self
                .blacklist_whitelisted
                .unwrap_or(base.blacklist_whitelisted),
        }
    }
}

fn address_over_defaults<'de, D>(deserializer: D) -> Result<AttackTypeConfig, D::Error>
where
    D: Deserializer<'de>,
{
    AttackTypeOverrides::deserialize(deserializer)
        .map(|overrides| overrides.over(AttackTypeConfig::address_defaults()))
}

fn country_over_defaults<'de, D>(deserializer: D) -> Result<AttackTypeConfig, D::Error>
where
    D: Deserializer<'de>,
{
    AttackTypeOverrides::deserialize(deserializer)
        .map(|overrides| overrides.over(AttackTypeConfig::country_defaults()))
}

/// Notification configuration settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Send notifications at all
    pub enabled: bool,
    /// Channels notified once per attack window
    pub channels: Vec<String>,
    /// Webhook URL for each channel
    pub webhooks: HashMap<String, String>,
}

/// Geolocation table: network in CIDR notation to country code
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    pub networks: HashMap<String, String>,
}

/// Metrics exporter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Settings {
    /// Load configuration from an optional file and environment variables
    ///
    /// The file defaults to `config/firewall` (any format the `config` crate
    /// understands) and can be moved with `FIREWALL_CONFIG`. Environment
    /// variables use the `FIREWALL` prefix and `__` between nested keys, e.g.
    /// `FIREWALL_ATTACK__ADDRESS__MAX_REQUESTS=10`. Lists take comma
    /// separated values, e.g. `FIREWALL_BLACKLIST=10.0.0.1,10.1.0.0/16`.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_with(Self::environment())
    }

    /// The `FIREWALL_*` environment source
    pub fn environment() -> config::Environment {
        config::Environment::with_prefix("FIREWALL")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("whitelist")
            .with_list_parse_key("blacklist")
            .with_list_parse_key("notifications.channels")
    }

    /// Load configuration from the optional file layered under `environment`
    pub fn load_with(environment: config::Environment) -> Result<Self, config::ConfigError> {
        let path = env::var("FIREWALL_CONFIG").unwrap_or_else(|_| "config/firewall".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(environment)
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 0,
            list_snapshot_ttl_seconds: 0,
            enable_range_search: true,
            enable_country_search: false,
            enable_log: true,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            redirect_non_whitelisted_to: None,
            response: ResponseConfig::default(),
            storage: StorageConfig::default(),
            attack: AttackConfig::default(),
            notifications: NotificationConfig::default(),
            geoip: GeoIpConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            code: 403,
            message: None,
            redirect_to: None,
            abort: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache: CacheDriver::Memory,
            persistence: PersistenceDriver::Config,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: "firewall".to_string(),
        }
    }
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            cache_key_prefix: "firewall-attack-blocker".to_string(),
            address: AttackTypeConfig::address_defaults(),
            country: AttackTypeConfig::country_defaults(),
            response: ResponseConfig::default(),
        }
    }
}

impl AttackTypeConfig {
    /// Per-address tracking: 50 requests per 60 seconds, disabled
    pub fn address_defaults() -> Self {
        Self {
            enabled: false,
            max_requests: 50,
            window_seconds: 60,
            blacklist_unknown: false,
            blacklist_whitelisted: false,
        }
    }

    /// Per-country tracking: 3000 requests per 120 seconds, disabled
    pub fn country_defaults() -> Self {
        Self {
            max_requests: 3000,
            window_seconds: 120,
            ..Self::address_defaults()
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9000".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_disable_caches_and_detection() {
        let settings = Settings::default();

        assert_eq!(settings.cache_ttl_seconds, 0);
        assert_eq!(settings.list_snapshot_ttl_seconds, 0);
        assert!(settings.enable_range_search);
        assert!(!settings.enable_country_search);
        assert!(!settings.attack.address.enabled);
        assert!(!settings.attack.country.enabled);
        assert_eq!(settings.attack.address.max_requests, 50);
        assert_eq!(settings.attack.country.window_seconds, 120);
        assert_eq!(settings.response.code, 403);
        assert_eq!(settings.storage.persistence, PersistenceDriver::Config);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "enable_country_search": true,
            "blacklist": ["10.0.0.0/8"],
            "attack": { "address": { "enabled": true, "max_requests": 2 } },
            "storage": { "persistence": "memory" }
        }))
        .unwrap();

        assert!(settings.enable_country_search);
        assert_eq!(settings.blacklist, vec!["10.0.0.0/8".to_string()]);
        assert!(settings.attack.address.enabled);
        assert_eq!(settings.attack.address.max_requests, 2);
        assert_eq!(settings.attack.address.window_seconds, 60);
        assert_eq!(settings.attack.country.max_requests, 3000);
        assert_eq!(settings.storage.persistence, PersistenceDriver::Memory);
    }

    #[test]
    fn test_partial_attack_blocks_keep_their_own_defaults() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "attack": {
                "address": { "window_seconds": 30 },
                "country": { "enabled": true }
            }
        }))
        .unwrap();

        assert!(settings.attack.country.enabled);
        assert_eq!(settings.attack.country.max_requests, 3000);
        assert_eq!(settings.attack.country.window_seconds, 120);
        assert!(!settings.attack.country.blacklist_unknown);

        assert!(!settings.attack.address.enabled);
        assert_eq!(settings.attack.address.max_requests, 50);
        assert_eq!(settings.attack.address.window_seconds, 30);
    }

    #[test]
    fn test_environment_lists_and_partial_country_block() {
        let variables: config::Map<String, String> = [
            ("FIREWALL_BLACKLIST", "10.0.0.1,10.1.0.0/16"),
            ("FIREWALL_WHITELIST", "192.168.0.1"),
            ("FIREWALL_NOTIFICATIONS__ENABLED", "true"),
            ("FIREWALL_NOTIFICATIONS__CHANNELS", "mail,slack"),
            ("FIREWALL_ATTACK__COUNTRY__ENABLED", "true"),
            ("FIREWALL_ATTACK__ADDRESS__MAX_REQUESTS", "10"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

        let settings = Settings::load_with(Settings::environment().source(Some(variables))).unwrap();

        assert_eq!(settings.blacklist, vec!["10.0.0.1", "10.1.0.0/16"]);
        assert_eq!(settings.whitelist, vec!["192.168.0.1"]);
        assert!(settings.notifications.enabled);
        assert_eq!(settings.notifications.channels, vec!["mail", "slack"]);
        assert!(settings.attack.country.enabled);
        assert_eq!(settings.attack.country.max_requests, 3000);
        assert_eq!(settings.attack.country.window_seconds, 120);
        assert_eq!(settings.attack.address.max_requests, 10);
        assert_eq!(settings.attack.address.window_seconds, 60);
    }
}
