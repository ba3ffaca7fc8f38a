use std::time::Duration;

use async_trait::async_trait;

use crate::{Alert, AlertType, NotificationChannel, NotificationError};

/// Discord webhook notifier.
pub struct DiscordWebhookNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordWebhookNotifier {
    pub fn new(webhook_url: &str) -> Result<Self, NotificationError> {
        if !webhook_url.starts_with("https://") && !webhook_url.starts_with("http://") {
            return Err(NotificationError::Config(format!(
                "webhook URL must be http(s): {}",
                webhook_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotificationError::Config(e.to_string()))?;
        Ok(Self {
            webhook_url: webhook_url.to_string(),
            client,
        })
    }
}

pub(crate) fn embed_color(alert_type: &AlertType) -> u32 {
    match alert_type {
        AlertType::TradeExecuted { action, .. } => {
            if action.eq_ignore_ascii_case("buy") {
                0x00ff00
            } else {
                0xff0000
            }
        }
        AlertType::TradeAdvisory { .. } => 0x0099ff,
        AlertType::SystemError { .. } => 0xff6600,
        AlertType::Info => 0x999999,
    }
}

#[async_trait]
impl NotificationChannel for DiscordWebhookNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        let payload = serde_json::json!({
            "username": "InvestIQ Decision Agent",
            "embeds": [{
                "title": alert.title,
                "description": alert.message,
                "color": embed_color(&alert.alert_type),
                "timestamp": alert.timestamp.to_rfc3339(),
            }]
        });

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| NotificationError::Discord(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "discord-webhook"
    }
}

/// Writes alerts to the tracing log.
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        match &alert.alert_type {
            AlertType::SystemError { context, error } => {
                tracing::error!(context = %context, "{}: {}", alert.title, error)
            }
            _ => tracing::info!("{}: {}", alert.title, alert.message),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
