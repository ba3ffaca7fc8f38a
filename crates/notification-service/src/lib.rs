mod channels;

pub use channels::{DiscordWebhookNotifier, LogNotifier};

use std::sync::Arc;

use async_trait::async_trait;
use decision_core::{CoreError, CoreResult, Decision, Notifier};
use resilience::{CircuitBreaker, CircuitBreakerRegistry, ResilienceError};
use serde::{Deserialize, Serialize};

/// Alert types that trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertType {
    TradeExecuted {
        symbol: String,
        action: String,
        quantity: f64,
        confidence: f64,
        order_ref: Option<String>,
    },
    /// Decision surfaced for a human because the mode does not auto-execute
    TradeAdvisory {
        symbol: String,
        action: String,
        confidence: f64,
        reason: String,
    },
    SystemError {
        context: String,
        error: String,
    },
    Info,
}

/// A notification alert to be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            timestamp: chrono::Utc::now(),
            title: title.into(),
            message: message.into(),
        }
    }

    /// Trade notification for a decision, executed or advisory.
    pub fn for_decision(symbol: &str, decision: &Decision) -> Self {
        let action = decision.action.to_label().to_string();
        let summary = format!(
            "{} {} at {:.1}% confidence ({} agents agree)\n{}",
            action,
            symbol,
            decision.confidence,
            decision.consensus.agreement_label(),
            decision.consensus.score_summary()
        );

        if decision.executed {
            Alert::new(
                AlertType::TradeExecuted {
                    symbol: symbol.to_string(),
                    action: action.clone(),
                    quantity: decision.risk.suggested_size,
                    confidence: decision.confidence,
                    order_ref: decision.order_ref.clone(),
                },
                format!("Trade executed: {} {}", action, symbol),
                format!("{}\nSize: {:.0}", summary, decision.risk.suggested_size),
            )
        } else {
            Alert::new(
                AlertType::TradeAdvisory {
                    symbol: symbol.to_string(),
                    action: action.clone(),
                    confidence: decision.confidence,
                    reason: decision.reasoning.clone(),
                },
                format!("Trade idea: {} {}", action, symbol),
                format!("{}\n{}", summary, decision.reasoning),
            )
        }
    }
}

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Errors from the notification system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotificationError {
    #[error("Discord webhook error: {0}")]
    Discord(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for the notification service.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub discord_webhook_url: Option<String>,
    /// Mirror every alert to the tracing log
    pub log_alerts: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: None,
            log_alerts: true,
        }
    }
}

struct GuardedChannel {
    channel: Box<dyn NotificationChannel>,
    breaker: Arc<CircuitBreaker>,
}

/// Dispatches alerts to all configured channels, each behind its own breaker.
pub struct NotificationService {
    channels: Vec<GuardedChannel>,
}

impl NotificationService {
    pub fn new(config: &NotificationConfig, breakers: &CircuitBreakerRegistry) -> Self {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

        if config.log_alerts {
            channels.push(Box::new(LogNotifier));
        }

        if let Some(ref webhook_url) = config.discord_webhook_url {
            match DiscordWebhookNotifier::new(webhook_url) {
                Ok(notifier) => {
                    channels.push(Box::new(notifier));
                    tracing::info!("Discord webhook notifications enabled");
                }
                Err(e) => tracing::warn!("Failed to initialize Discord notifier: {}", e),
            }
        }

        if channels.is_empty() {
            tracing::info!("No notification channels configured (set DISCORD_WEBHOOK_URL)");
        }

        Self::with_channels(channels, breakers)
    }

    pub fn with_channels(
        channels: Vec<Box<dyn NotificationChannel>>,
        breakers: &CircuitBreakerRegistry,
    ) -> Self {
        let guarded = channels
            .into_iter()
            .map(|channel| GuardedChannel {
                breaker: breakers.get(&format!("notify:{}", channel.name())),
                channel,
            })
            .collect();
        Self { channels: guarded }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send alert to all channels, awaiting completion.
    /// Returns how many channels accepted it.
    pub async fn send_to_all(&self, alert: &Alert) -> usize {
        dispatch(&self.channels, alert).await
    }

    async fn deliver(&self, alert: Alert) -> CoreResult<()> {
        let delivered = self.send_to_all(&alert).await;
        if delivered == 0 && !self.channels.is_empty() {
            return Err(CoreError::Notification(format!(
                "no channel accepted '{}'",
                alert.title
            )));
        }
        Ok(())
    }
}

async fn dispatch(channels: &[GuardedChannel], alert: &Alert) -> usize {
    let mut delivered = 0;
    for guarded in channels {
        let name = guarded.channel.name();
        match guarded.breaker.call(|| guarded.channel.send(alert)).await {
            Ok(()) => {
                delivered += 1;
                tracing::debug!("Sent notification via {}", name);
            }
            Err(ResilienceError::CircuitOpen { .. }) => {
                tracing::debug!("Skipping {} while its circuit is open", name)
            }
            Err(e) => tracing::warn!("Failed to send notification via {}: {}", name, e),
        }
    }
    delivered
}

#[async_trait]
impl Notifier for NotificationService {
    async fn send_trade(&self, symbol: &str, decision: &Decision) -> CoreResult<()> {
        self.deliver(Alert::for_decision(symbol, decision)).await
    }

    async fn send_alert(&self, message: &str) -> CoreResult<()> {
        self.deliver(Alert::new(AlertType::Info, "Decision agent alert", message))
            .await
    }

    async fn send_error(&self, error: &str, context: &str) -> CoreResult<()> {
        self.deliver(Alert::new(
            AlertType::SystemError {
                context: context.to_string(),
                error: error.to_string(),
            },
            format!("Error: {}", context),
            error,
        ))
        .await
    }
}
