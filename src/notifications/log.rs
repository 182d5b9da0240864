use async_trait::async_trait;

use super::NotificationSink;
use crate::core::AttackRecord;
use crate::utils::FirewallResult;

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, record: &AttackRecord, channel: &str) -> FirewallResult<()> {
        tracing::warn!(
            channel = %channel,
            ip = %record.subject_address,
            attack_type = %record.attack_type,
            request_count = %record.request_count,
            host = ?record.hostname,
            country = ?record.country_code,
            first_request_at = %record.first_request_at,
            event = "attack_notification",
            "{} attack detected from {}",
            record.attack_type,
            record.subject_address
        );

        Ok(())
    }
}
