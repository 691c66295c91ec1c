use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use vigil_alert::message::NotificationMessage;
use vigil_common::types::AlertStatus;

use crate::{NotifyError, NotificationChannel};

/// Posts notification messages as JSON to a configured URL.
#[derive(Debug)]
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Rejects endpoints the client could never post to, so a bad channel
    /// config fails at registration instead of on the first fire.
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| NotifyError::InvalidConfig(format!("invalid webhook url '{url}': {e}")))?;
        Ok(Self {
            url,
            client: reqwest::Client::new(),
        })
    }

    /// JSON body delivered to the endpoint.
    pub fn payload(message: &NotificationMessage) -> Value {
        serde_json::json!({
            "status": if message.status == AlertStatus::Resolved { "resolved" } else { "firing" },
            "rule_id": message.rule.id,
            "rule_name": message.rule.name,
            "app": message.rule.app,
            "labels": message.labels,
            "end": message.end,
            "last_alert_at": message.last_alert_at,
            "record_id": message.record_id,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&Self::payload(message))
            .send()
            .await
            .map_err(NotifyError::Http)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                url = %self.url,
                status = status.as_u16(),
                "webhook returned non-success status"
            );
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "webhook"
    }
}
