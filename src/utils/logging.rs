use tracing::Level;
use tracing_subscriber::{fmt::format::FmtSpan, util::SubscriberInitExt, EnvFilter};

use crate::core::AttackRecord;

/// Initialize the logging system
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this more
/// than once keeps the first subscriber.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_level(true)
        .finish();

    if subscriber.try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Create a new span for tracking a single request check
pub fn create_request_span(address: &str) -> tracing::Span {
    tracing::info_span!(
        "firewall_check",
        address = %address,
        timestamp = %chrono::Utc::now()
    )
}

/// Log a firewall message, honouring the `enable_log` setting
pub fn log_firewall(enabled: bool, message: &str) {
    if enabled {
        tracing::info!("FIREWALL: {}", message);
    }
}

/// Log an attack detection event
pub fn log_attack_detected(record: &AttackRecord, threshold: u64) {
    tracing::warn!(
        ip = %record.subject_address,
        attack_type = %record.attack_type,
        request_count = %record.request_count,
        threshold = %threshold,
        country = ?record.country_code,
        event = "attack_detected",
        timestamp = %chrono::Utc::now()
    );
}

/// Log a list mutation
pub fn log_list_change(action: &str, address: &str, success: bool, details: &str) {
    if success {
        tracing::event!(
            Level::INFO,
            action = %action,
            address = %address,
            details = %details,
            event = "list_change"
        );
    } else {
        tracing::event!(
            Level::DEBUG,
            action = %action,
            address = %address,
            details = %details,
            event = "list_change_rejected"
        );
    }
}

/// Log a missing geolocation answer
pub fn log_geo_unavailable(address: &str) {
    tracing::info!(
        ip = %address,
        event = "geo_lookup_unavailable",
        "No GeoIp info for {}, is a geo resolver configured?",
        address
    );
}

/// Log a notification that could not be delivered
pub fn log_notification_failure(channel: &str, error: &dyn std::error::Error) {
    tracing::error!(
        channel = %channel,
        error = %error,
        event = "notification_failed",
        timestamp = %chrono::Utc::now()
    );
}
