//! Configuration management for the firewall.
//! This module handles loading the typed settings from an optional
//! configuration file and environment variables.

mod settings;

pub use settings::{
    AttackConfig, AttackTypeConfig, CacheDriver, GeoIpConfig, MetricsConfig, NotificationConfig,
    PersistenceDriver, ResponseConfig, Settings, StorageConfig,
};

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, config::ConfigError>;

/// Load the application configuration
pub fn load_config() -> ConfigResult<Settings> {
    Settings::load()
}
