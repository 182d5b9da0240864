//! IP and country firewall for web applications.
//!
//! Addresses are classified against whitelist and blacklist entries (exact
//! addresses, CIDR blocks, wildcards, ranges, host names and countries) and
//! a sliding-window detector escalates clients that send too many requests.

pub mod cache;
pub mod config;
pub mod core;
pub mod notifications;
pub mod persistence;
pub mod resolvers;
pub mod service;
pub mod utils;

pub use crate::config::Settings;
pub use crate::core::{ActionSignal, Classification, ListEntry, ListOutcome, ListOutcomeKind};
pub use crate::service::{Firewall, FirewallBuilder};
pub use crate::utils::{FirewallError, FirewallResult};
