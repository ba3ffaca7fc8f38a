use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use consensus::AgentWeights;
use decision_core::OperatingMode;
use notification_service::NotificationConfig;
use resilience::{CircuitBreakerConfig, RetryPolicy};
use risk_gate::RiskConfig;
use serde::{Deserialize, Serialize};

use crate::authorizer::AuthorizationPolicy;

/// A remote signal agent reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSourceConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Authorization
    pub operating_mode: OperatingMode,
    pub auto_execute_min_confidence: f64, // 75 (percent)
    pub max_daily_trades: u32,            // 10
    pub max_daily_loss: f64,              // $500
    pub trade_cooldown_seconds: u64,      // 300
    pub max_consecutive_losses: u32,      // 3, 0 disables
    pub decision_history_size: usize,     // 1000

    // Consensus
    pub agent_weights: AgentWeights,

    // Risk limits
    pub min_risk_reward: f64,             // 1.5
    pub max_position_percent: f64,        // 20%
    pub max_sector_exposure_percent: f64, // 30%
    pub max_gross_exposure: f64,          // 1.0x
    pub max_risk_per_trade_percent: f64,  // 2%

    // Resilience
    pub circuit_failure_threshold: u32,
    pub circuit_reset_timeout_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_factor: f64,
    pub retry_jitter: bool,

    // Scanning
    pub signal_sources: Vec<SignalSourceConfig>,
    pub signal_timeout_seconds: u64,
    pub watchlist: Vec<String>,
    pub scan_interval_seconds: u64,
    pub market_regime: String,
    pub paper_starting_cash: f64,
    pub metrics_log_interval: u64,

    // Notifications
    pub discord_webhook_url: Option<String>,
    pub log_alerts: bool,

    // Database
    pub database_url: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let unknown_weight: f64 = env::var("UNKNOWN_AGENT_WEIGHT")
            .unwrap_or_else(|_| consensus::DEFAULT_UNKNOWN_WEIGHT.to_string())
            .parse()
            .context("UNKNOWN_AGENT_WEIGHT must be a number")?;
        let agent_weights = env::var("AGENT_WEIGHTS")
            .unwrap_or_else(|_| "technical:0.35,sentiment:0.25,fundamental:0.40".to_string())
            .parse::<AgentWeights>()
            .context("Invalid AGENT_WEIGHTS")?
            .with_default_weight(unknown_weight);

        let config = Self {
            operating_mode: OperatingMode::from(
                env::var("OPERATING_MODE").unwrap_or_else(|_| "manual".to_string()),
            ),
            auto_execute_min_confidence: env::var("AUTO_EXECUTE_MIN_CONFIDENCE")
                .unwrap_or_else(|_| "75.0".to_string())
                .parse()?,
            max_daily_trades: env::var("MAX_DAILY_TRADES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            max_daily_loss: env::var("MAX_DAILY_LOSS")
                .unwrap_or_else(|_| "500.0".to_string())
                .parse()?,
            trade_cooldown_seconds: env::var("TRADE_COOLDOWN_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            max_consecutive_losses: env::var("MAX_CONSECUTIVE_LOSSES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            decision_history_size: env::var("DECISION_HISTORY_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,

            agent_weights,

            min_risk_reward: env::var("MIN_RISK_REWARD")
                .unwrap_or_else(|_| "1.5".to_string())
                .parse()?,
            max_position_percent: env::var("MAX_POSITION_PERCENT")
                .unwrap_or_else(|_| "20.0".to_string())
                .parse()?,
            max_sector_exposure_percent: env::var("MAX_SECTOR_EXPOSURE_PERCENT")
                .unwrap_or_else(|_| "30.0".to_string())
                .parse()?,
            max_gross_exposure: env::var("MAX_GROSS_EXPOSURE")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()?,
            max_risk_per_trade_percent: env::var("MAX_RISK_PER_TRADE_PERCENT")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,

            circuit_failure_threshold: env::var("CIRCUIT_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            circuit_reset_timeout_seconds: env::var("CIRCUIT_RESET_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            retry_max_attempts: env::var("RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            retry_initial_delay_ms: env::var("RETRY_INITIAL_DELAY_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            retry_max_delay_ms: env::var("RETRY_MAX_DELAY_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,
            retry_backoff_factor: env::var("RETRY_BACKOFF_FACTOR")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,
            retry_jitter: env::var("RETRY_JITTER")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            signal_sources: parse_signal_sources(
                &env::var("SIGNAL_SOURCES").unwrap_or_else(|_| String::new()),
            )?,
            signal_timeout_seconds: env::var("SIGNAL_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            watchlist: env::var("WATCHLIST")
                .unwrap_or_else(|_| "AAPL,MSFT,GOOGL,AMZN,NVDA,TSLA,META,AMD,NFLX,SPY".to_string())
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            scan_interval_seconds: env::var("SCAN_INTERVAL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            market_regime: env::var("MARKET_REGIME").unwrap_or_else(|_| "normal".to_string()),
            paper_starting_cash: env::var("PAPER_STARTING_CASH")
                .unwrap_or_else(|_| "100000.0".to_string())
                .parse()?,
            metrics_log_interval: env::var("METRICS_LOG_INTERVAL")
                .unwrap_or_else(|_| "12".to_string())
                .parse()?,

            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            log_alerts: env::var("NOTIFY_LOG")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:decisions.db?mode=rwc".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make the gates meaningless or the retry loop degenerate.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.auto_execute_min_confidence) {
            bail!(
                "AUTO_EXECUTE_MIN_CONFIDENCE must be within 0-100, got {}",
                self.auto_execute_min_confidence
            );
        }
        let non_negative = [
            ("MAX_DAILY_LOSS", self.max_daily_loss),
            ("MIN_RISK_REWARD", self.min_risk_reward),
            ("MAX_POSITION_PERCENT", self.max_position_percent),
            ("MAX_SECTOR_EXPOSURE_PERCENT", self.max_sector_exposure_percent),
            ("MAX_GROSS_EXPOSURE", self.max_gross_exposure),
            ("MAX_RISK_PER_TRADE_PERCENT", self.max_risk_per_trade_percent),
            ("PAPER_STARTING_CASH", self.paper_starting_cash),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                bail!("{} must be a non-negative number, got {}", name, value);
            }
        }
        if self.retry_max_attempts == 0 {
            bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if self.retry_backoff_factor.is_nan() || self.retry_backoff_factor < 1.0 {
            bail!(
                "RETRY_BACKOFF_FACTOR must be >= 1.0, got {}",
                self.retry_backoff_factor
            );
        }
        if self.retry_max_delay_ms < self.retry_initial_delay_ms {
            bail!("RETRY_MAX_DELAY_MS must not be below RETRY_INITIAL_DELAY_MS");
        }
        if self.circuit_failure_threshold == 0 {
            bail!("CIRCUIT_FAILURE_THRESHOLD must be at least 1");
        }
        if self.scan_interval_seconds == 0 {
            bail!("SCAN_INTERVAL must be at least 1 second");
        }
        Ok(())
    }

    pub fn authorization_policy(&self) -> AuthorizationPolicy {
        AuthorizationPolicy {
            mode: self.operating_mode.clone(),
            auto_execute_min_confidence: self.auto_execute_min_confidence,
            max_daily_trades: self.max_daily_trades,
            max_daily_loss: self.max_daily_loss,
            trade_cooldown: Duration::from_secs(self.trade_cooldown_seconds),
            max_consecutive_losses: self.max_consecutive_losses,
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            min_risk_reward: self.min_risk_reward,
            max_position_percent: self.max_position_percent,
            max_sector_exposure_percent: self.max_sector_exposure_percent,
            max_gross_exposure: self.max_gross_exposure,
            max_risk_per_trade_percent: self.max_risk_per_trade_percent,
            max_daily_loss: self.max_daily_loss,
            ..RiskConfig::default()
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            reset_timeout: Duration::from_secs(self.circuit_reset_timeout_seconds),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_factor: self.retry_backoff_factor,
            jitter: self.retry_jitter,
        }
    }

    pub fn notification_config(&self) -> NotificationConfig {
        NotificationConfig {
            discord_webhook_url: self.discord_webhook_url.clone(),
            log_alerts: self.log_alerts,
        }
    }
}

/// Parses `"technical=http://localhost:8010,sentiment=http://localhost:8011"`.
pub fn parse_signal_sources(raw: &str) -> Result<Vec<SignalSourceConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<SignalSourceConfig> {
            let (name, url) = entry
                .split_once('=')
                .with_context(|| {
                    format!("Malformed SIGNAL_SOURCES entry '{}', expected name=url", entry)
                })?;
            let (name, url) = (name.trim(), url.trim().trim_end_matches('/'));
            if name.is_empty() || url.is_empty() {
                bail!("Malformed SIGNAL_SOURCES entry '{}', expected name=url", entry);
            }
            Ok(SignalSourceConfig {
                name: name.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}
