//! Utility modules for the firewall.
//! This module contains the error type, logging helpers and the clock
//! abstraction shared by every component.

mod clock;
mod error;
mod logging;

pub use clock::{Clock, MockClock, SystemClock};
pub use error::{FirewallError, FirewallResult};
pub use logging::{
    create_request_span, init_logging, log_attack_detected, log_firewall, log_geo_unavailable,
    log_list_change, log_notification_failure,
};
