use serde::{Deserialize, Serialize};

/// Static risk limits shared by the evaluator and the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Minimum reward-to-risk ratio; lower ratios are vetoed by the gate
    pub min_risk_reward: f64,
    /// Largest single position as a percent of portfolio value
    pub max_position_percent: f64,
    pub max_sector_exposure_percent: f64,
    /// Gross exposure cap as a fraction of portfolio value (1.0 = no leverage)
    pub max_gross_exposure: f64,
    /// Capital put at risk per trade, percent of portfolio value
    pub max_risk_per_trade_percent: f64,
    /// Stop distance assumed when an opinion carries no stop-loss
    #[serde(default = "default_stop_loss_percent")]
    pub default_stop_loss_percent: f64,
    /// Session loss budget in account currency
    pub max_daily_loss: f64,
}

fn default_stop_loss_percent() -> f64 {
    5.0
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_risk_reward: 1.5,
            max_position_percent: 20.0,
            max_sector_exposure_percent: 30.0,
            max_gross_exposure: 1.0,
            max_risk_per_trade_percent: 2.0,
            default_stop_loss_percent: 5.0,
            max_daily_loss: 500.0,
        }
    }
}
