//! Attack notification channels.
//!
//! The detector hands each triggered record to a [`NotificationSink`] once
//! per configured channel. Delivery errors are returned to the detector,
//! which logs them and carries on.

mod log;
mod webhook;

pub use self::log::LogNotifier;
pub use self::webhook::{AttackNotification, WebhookNotifier};

use async_trait::async_trait;

use crate::core::AttackRecord;
use crate::utils::FirewallResult;

/// Delivers attack notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification for `record` on `channel`
    async fn notify(&self, record: &AttackRecord, channel: &str) -> FirewallResult<()>;
}
