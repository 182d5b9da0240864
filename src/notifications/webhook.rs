use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client as ReqwestClient;
use serde::Serialize;

use super::NotificationSink;
use crate::config::NotificationConfig;
use crate::core::{AttackRecord, AttackType};
use crate::utils::{FirewallError, FirewallResult};

/// JSON body posted to a webhook
#[derive(Debug, Serialize)]
pub struct AttackNotification<'a> {
    pub channel: &'a str,
    pub attack_type: AttackType,
    pub ip_address: &'a str,
    pub request_count: u64,
    pub first_request_at: DateTime<Utc>,
    pub last_request_at: DateTime<Utc>,
    pub country_code: Option<&'a str>,
    pub host: Option<&'a str>,
    pub blacklisted: bool,
}

impl<'a> AttackNotification<'a> {
    fn new(record: &'a AttackRecord, channel: &'a str) -> Self {
        Self {
            channel,
            attack_type: record.attack_type,
            ip_address: &record.subject_address,
            request_count: record.request_count,
            first_request_at: record.first_request_at,
            last_request_at: record.last_request_at,
            country_code: record.country_code.as_deref(),
            host: record.hostname.as_deref(),
            blacklisted: record.is_blacklisted,
        }
    }
}

/// Posts notifications to one webhook URL per channel
pub struct WebhookNotifier {
    client: ReqwestClient,
    webhooks: HashMap<String, String>,
}

impl WebhookNotifier {
    /// Creates a notifier for the configured channel webhooks
    pub fn new(config: &NotificationConfig) -> FirewallResult<Self> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FirewallError::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            webhooks: config.webhooks.clone(),
        })
    }

    /// Whether `channel` has a webhook
    pub fn handles(&self, channel: &str) -> bool {
        self.webhooks.contains_key(channel)
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, record: &AttackRecord, channel: &str) -> FirewallResult<()> {
        let url = self
            .webhooks
            .get(channel)
            .ok_or_else(|| FirewallError::NotificationDelivery {
                channel: channel.to_string(),
                reason: "no webhook configured".to_string(),
            })?;

        let delivery_error = |reason: String| FirewallError::NotificationDelivery {
            channel: channel.to_string(),
            reason,
        };

        let response = self
            .client
            .post(url)
            .json(&AttackNotification::new(record, channel))
            .send()
            .await
            .map_err(|e| delivery_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(delivery_error(format!("webhook answered {}", response.status())));
        }

        tracing::debug!(channel = %channel, url = %url, "attack notification delivered");

        Ok(())
    }
}
