//! Webhook notification sink.
//!
//! Posts alerts as JSON to a configured webhook URL (Slack/Discord-style
//! incoming webhook). Delivery is best-effort by contract: the caller
//! logs failures and the triggering decision stands either way.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::types::{Alert, NotificationSink};

pub struct WebhookNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn post_alert(&self, alert: &Alert) -> Result<()> {
        let payload = serde_json::json!({
            "text": format!("[{:?}] {}", alert.level, alert.title),
            "level": alert.level,
            "title": alert.title,
            "detail": alert.detail,
            "timestamp": alert.timestamp,
        });

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send alert to webhook")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook returned {}: {}", status, body);
        }

        debug!("Alert posted: {}", alert.title);
        Ok(())
    }
}
