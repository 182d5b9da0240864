use thiserror::Error;

/// Errors that can occur while classifying addresses or tracking attacks
///
/// Ordinary outcomes such as an invalid address or an address that is already
/// listed are not errors; they are reported through `ListOutcome`.
#[derive(Error, Debug)]
pub enum FirewallError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Redis related errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The durable list store could not complete a lookup or mutation
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// A cached value or stored entry could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A notification could not be delivered on a channel
    #[error("Notification delivery failed on channel {channel}: {reason}")]
    NotificationDelivery { channel: String, reason: String },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for firewall operations
pub type FirewallResult<T> = Result<T, FirewallError>;

impl From<std::io::Error> for FirewallError {
    fn from(err: std::io::Error) -> Self {
        FirewallError::Internal(err.to_string())
    }
}

impl FirewallError {
    /// Wraps a backend failure of the durable list store
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        FirewallError::PersistenceUnavailable(err.to_string())
    }
}
