use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Clamp a confidence value into the 0-100 range. Non-finite input maps to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Recommended trading action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn to_label(&self) -> &'static str {
        match self {
            Action::Buy => "Buy",
            Action::Sell => "Sell",
            Action::Hold => "Hold",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_label())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Action::Buy),
            "sell" => Ok(Action::Sell),
            "hold" => Ok(Action::Hold),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Operating mode of the execution authorizer.
///
/// Unknown strings are preserved as `Unrecognized` so the authorizer can
/// refuse them explicitly instead of silently picking a mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperatingMode {
    #[default]
    Manual,
    NotifyOnly,
    SemiAuto,
    FullAuto,
    Unrecognized(String),
}

impl From<&str> for OperatingMode {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "manual" => OperatingMode::Manual,
            "notify_only" | "notify" => OperatingMode::NotifyOnly,
            "semi_auto" | "semi" => OperatingMode::SemiAuto,
            "full_auto" | "auto" => OperatingMode::FullAuto,
            _ => OperatingMode::Unrecognized(raw.to_string()),
        }
    }
}

impl From<String> for OperatingMode {
    fn from(raw: String) -> Self {
        OperatingMode::from(raw.as_str())
    }
}

impl From<OperatingMode> for String {
    fn from(mode: OperatingMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Manual => f.write_str("manual"),
            OperatingMode::NotifyOnly => f.write_str("notify_only"),
            OperatingMode::SemiAuto => f.write_str("semi_auto"),
            OperatingMode::FullAuto => f.write_str("full_auto"),
            OperatingMode::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

/// One signal agent's opinion on a symbol. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalOpinion {
    #[serde(default)]
    pub source: String,
    pub recommendation: Action,
    /// 0 to 100
    pub confidence: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub targets: Vec<f64>,
    #[serde(default)]
    pub rationale: String,
    pub timestamp: DateTime<Utc>,
}

impl SignalOpinion {
    /// Reward to risk using the first target. None when any leg is missing
    /// or the stop sits on the entry.
    pub fn risk_reward_ratio(&self) -> Option<f64> {
        let entry = self.entry_price?;
        let stop = self.stop_loss?;
        let target = *self.targets.first()?;
        let risk = (entry - stop).abs();
        if risk <= f64::EPSILON {
            return None;
        }
        Some((target - entry).abs() / risk)
    }
}

/// Weighted consensus over all consulted signal agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub action: Action,
    /// 0 to 100
    pub confidence: f64,
    pub buy_score: f64,
    pub sell_score: f64,
    pub hold_score: f64,
    pub agreeing_agents: usize,
    pub total_agents: usize,
}

impl ConsensusResult {
    /// Result used when no agent produced an opinion.
    pub fn empty() -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            buy_score: 0.0,
            sell_score: 0.0,
            hold_score: 0.0,
            agreeing_agents: 0,
            total_agents: 0,
        }
    }

    pub fn is_unanimous(&self) -> bool {
        self.total_agents > 0 && self.agreeing_agents == self.total_agents
    }

    pub fn agreement_label(&self) -> String {
        format!("{}/{}", self.agreeing_agents, self.total_agents)
    }

    /// Human-readable score breakdown, only for reasoning text.
    pub fn score_summary(&self) -> String {
        format!(
            "Buy: {:.1}%, Sell: {:.1}%, Hold: {:.1}%",
            self.buy_score, self.sell_score, self.hold_score
        )
    }
}

/// Output of a risk evaluation. Stateless function of portfolio and config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub approved: bool,
    pub violations: Vec<String>,
    pub suggested_size: f64,
    pub max_size: f64,
    pub portfolio_impact_pct: f64,
    pub sector_exposure_pct: f64,
    pub remaining_daily_loss: f64,
    #[serde(default)]
    pub risk_reward_ratio: Option<f64>,
}

impl RiskAssessment {
    /// Not-approved assessment carrying a single violation.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            violations: vec![reason.into()],
            suggested_size: 0.0,
            max_size: 0.0,
            portfolio_impact_pct: 0.0,
            sector_exposure_pct: 0.0,
            remaining_daily_loss: 0.0,
            risk_reward_ratio: None,
        }
    }

    /// Force the assessment to not-approved and record why.
    pub fn veto(&mut self, reason: impl Into<String>) {
        self.approved = false;
        self.violations.push(reason.into());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: f64,
    pub market_value: f64,
    #[serde(default)]
    pub sector: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub cash: f64,
    pub total_value: f64,
    /// Realized + unrealized P&L for the current session
    #[serde(default)]
    pub daily_pnl: f64,
    #[serde(default)]
    pub positions: Vec<PositionSnapshot>,
}

impl PortfolioSnapshot {
    pub fn gross_exposure(&self) -> f64 {
        self.positions.iter().map(|p| p.market_value.abs()).sum()
    }
}

/// Market context handed to signal producers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub regime: String,
    #[serde(default)]
    pub current_price: Option<f64>,
}

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            regime: "normal".to_string(),
            current_price: None,
        }
    }
}

/// What the risk evaluator is asked to assess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRequest {
    pub symbol: String,
    pub action: Action,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub regime: String,
    pub portfolio: PortfolioSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pending,
    Win,
    Loss,
}

impl Outcome {
    /// Breakeven counts as a win.
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl < 0.0 {
            Outcome::Loss
        } else {
            Outcome::Win
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Win => "win",
            Outcome::Loss => "loss",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Outcome::Pending),
            "win" => Ok(Outcome::Win),
            "loss" => Ok(Outcome::Loss),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

/// One evaluation cycle's result for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub confidence: f64,
    pub consensus: ConsensusResult,
    pub risk: RiskAssessment,
    pub executed: bool,
    pub order_ref: Option<String>,
    pub outcome: Outcome,
    pub realized_pnl: Option<f64>,
    pub reasoning: String,
}

impl Decision {
    pub fn new(
        symbol: impl Into<String>,
        consensus: ConsensusResult,
        risk: RiskAssessment,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            timestamp: Utc::now(),
            action: consensus.action,
            confidence: clamp_confidence(consensus.confidence),
            consensus,
            risk,
            executed: false,
            order_ref: None,
            outcome: Outcome::Pending,
            realized_pnl: None,
            reasoning: reasoning.into(),
        }
    }
}

/// Per-session counters consulted by the authorizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyCounters {
    pub trade_count: u32,
    /// Cumulative realized loss as a positive amount
    pub daily_loss: f64,
    pub consecutive_losses: u32,
    pub last_trade_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Idempotency key, set to the decision id
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub status: String,
    pub filled_quantity: Decimal,
    pub fill_price: Option<Decimal>,
}
