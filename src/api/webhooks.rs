// src/api/webhooks.rs — Outbound change notifications
//
// Each changed snapshot field becomes one POST to the configured webhook.
// Delivery is best-effort: failures are logged and never reach the caller.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::infra::config::{DeviceSuffixes, WebhookConfig};
use crate::monitor::diff::Field;
use crate::portal::EnergyFlowSnapshot;

/// JSON body sent to the webhook URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeNotification {
    pub id: String,
    pub property: String,
    pub value: f64,
    pub timestamp: String,
}

/// Sink for change notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification. Never fails from the caller's point of view.
    async fn notify(&self, notification: &ChangeNotification);
}

/// One notification per changed field, in the order given.
pub fn build_notifications(
    station_id: &str,
    suffixes: &DeviceSuffixes,
    changes: &[Field],
    snapshot: &EnergyFlowSnapshot,
    at: DateTime<Utc>,
) -> Vec<ChangeNotification> {
    let timestamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);
    changes
        .iter()
        .map(|field| ChangeNotification {
            id: field.group().device_id(station_id, suffixes),
            property: field.property().to_string(),
            value: field.value(snapshot),
            timestamp: timestamp.clone(),
        })
        .collect()
}

/// Posts notifications as JSON to a single URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// `None` when no webhook URL is configured.
    pub fn from_config(config: &WebhookConfig) -> Option<Self> {
        config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| Self::new(u.trim(), Duration::from_secs(config.timeout_secs.max(1))))
    }

    async fn send(&self, notification: &ChangeNotification) -> Result<(), reqwest::Error> {
        let resp = self
            .client
            .post(&self.url)
            .header(
                "user-agent",
                format!("fusionbridge/{}", env!("CARGO_PKG_VERSION")),
            )
            .json(notification)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                "Webhook returned HTTP {} for {}/{}: {}",
                status.as_u16(),
                notification.id,
                notification.property,
                truncate(&body, 200)
            );
        } else {
            tracing::debug!(
                "Webhook delivered {}={} for {}",
                notification.property,
                notification.value,
                notification.id
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &ChangeNotification) {
        if let Err(e) = self.send(notification).await {
            tracing::warn!("Webhook delivery to {} failed: {}", self.url, e);
        }
    }
}

/// Truncate a string for logging without splitting a character.
fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
