use async_trait::async_trait;
use decision_core::{Action, CoreResult, RiskAssessment, RiskEvaluator, RiskRequest};

use crate::models::RiskConfig;

/// Default portfolio evaluator.
/// Sizes from risk-per-trade and stop distance, then checks sector
/// concentration, gross exposure, and the remaining daily-loss budget.
pub struct PortfolioRiskEvaluator {
    config: RiskConfig,
}

impl PortfolioRiskEvaluator {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn assess(&self, request: &RiskRequest) -> RiskAssessment {
        let portfolio = &request.portfolio;
        let realized_loss = (-portfolio.daily_pnl).max(0.0);
        let remaining_daily_loss = (self.config.max_daily_loss - realized_loss).max(0.0);

        let mut assessment = RiskAssessment {
            approved: true,
            violations: Vec::new(),
            suggested_size: 0.0,
            max_size: 0.0,
            portfolio_impact_pct: 0.0,
            sector_exposure_pct: 0.0,
            remaining_daily_loss,
            risk_reward_ratio: None,
        };

        // Nothing to size for a hold
        if request.action == Action::Hold {
            return assessment;
        }

        if remaining_daily_loss <= 0.0 {
            assessment.veto(format!(
                "Daily loss budget exhausted: ${:.2} lost of ${:.2} allowed",
                realized_loss, self.config.max_daily_loss
            ));
        }

        let total_value = portfolio.total_value;
        if total_value <= 0.0 {
            assessment.veto("Portfolio value unavailable");
            return assessment;
        }

        let Some(entry) = request.entry_price.filter(|p| *p > 0.0) else {
            assessment.veto("Entry price unavailable, cannot size position");
            return assessment;
        };

        let stop = request
            .stop_loss
            .filter(|s| *s > 0.0 && (entry - *s).abs() > f64::EPSILON)
            .unwrap_or_else(|| match request.action {
                Action::Sell => entry * (1.0 + self.config.default_stop_loss_percent / 100.0),
                _ => entry * (1.0 - self.config.default_stop_loss_percent / 100.0),
            });
        let risk_per_share = (entry - stop).abs();

        let risk_amount = total_value * (self.config.max_risk_per_trade_percent / 100.0);
        let max_position_value = total_value * (self.config.max_position_percent / 100.0);
        let max_size = (max_position_value / entry).floor();
        let risk_sized = if risk_per_share > 0.0 {
            (risk_amount / risk_per_share).floor()
        } else {
            0.0
        };
        let suggested_size = risk_sized.min(max_size).max(0.0);
        let position_value = suggested_size * entry;

        assessment.suggested_size = suggested_size;
        assessment.max_size = max_size;
        assessment.portfolio_impact_pct = position_value / total_value * 100.0;

        if suggested_size < 1.0 {
            assessment.veto(format!(
                "Position size rounds to zero at ${:.2} entry",
                entry
            ));
        }

        let sector = portfolio
            .positions
            .iter()
            .find(|p| p.symbol == request.symbol)
            .and_then(|p| p.sector.clone())
            .unwrap_or_else(|| symbol_to_sector(&request.symbol).to_string());
        let sector_value: f64 = portfolio
            .positions
            .iter()
            .filter(|p| {
                p.sector
                    .as_deref()
                    .unwrap_or_else(|| symbol_to_sector(&p.symbol))
                    == sector
            })
            .map(|p| p.market_value.abs())
            .sum::<f64>()
            + position_value;
        assessment.sector_exposure_pct = sector_value / total_value * 100.0;
        if assessment.sector_exposure_pct > self.config.max_sector_exposure_percent {
            assessment.veto(format!(
                "Sector '{}' exposure {:.1}% exceeds limit {:.1}%",
                sector, assessment.sector_exposure_pct, self.config.max_sector_exposure_percent
            ));
        }

        let exposure_ratio = (portfolio.gross_exposure() + position_value) / total_value;
        if exposure_ratio > self.config.max_gross_exposure {
            assessment.veto(format!(
                "Gross exposure {:.1}% exceeds limit {:.1}%",
                exposure_ratio * 100.0,
                self.config.max_gross_exposure * 100.0
            ));
        }

        tracing::debug!(
            symbol = %request.symbol,
            action = %request.action,
            suggested_size,
            max_size,
            sector = %sector,
            approved = assessment.approved,
            "Portfolio risk evaluated"
        );

        assessment
    }
}

#[async_trait]
impl RiskEvaluator for PortfolioRiskEvaluator {
    async fn evaluate(&self, request: &RiskRequest) -> CoreResult<RiskAssessment> {
        Ok(self.assess(request))
    }
}

/// Map symbols to GICS-like sectors for concentration checks.
pub fn symbol_to_sector(symbol: &str) -> &'static str {
    match symbol {
        "AAPL" | "MSFT" | "GOOGL" | "GOOG" | "META" | "NVDA" | "AMD" | "INTC" | "CRM"
        | "ORCL" | "ADBE" | "CSCO" | "AVGO" | "QCOM" | "IBM" | "MU" => "Technology",
        "AMZN" | "TSLA" | "HD" | "NKE" | "SBUX" | "MCD" | "LOW" | "TJX" => {
            "Consumer Discretionary"
        }
        "NFLX" | "DIS" | "CMCSA" | "T" | "VZ" | "TMUS" => "Communication",
        "JPM" | "BAC" | "WFC" | "GS" | "MS" | "C" | "BLK" | "SCHW" | "V" | "MA" => {
            "Financials"
        }
        "JNJ" | "UNH" | "PFE" | "ABBV" | "MRK" | "LLY" | "TMO" | "ABT" | "AMGN" => {
            "Healthcare"
        }
        "PG" | "KO" | "PEP" | "WMT" | "COST" | "PM" => "Consumer Staples",
        "XOM" | "CVX" | "COP" | "SLB" | "EOG" | "OXY" => "Energy",
        "BA" | "CAT" | "HON" | "UPS" | "RTX" | "GE" | "LMT" | "DE" => "Industrials",
        // broad ETFs count as their own bucket
        "SPY" | "QQQ" | "DIA" | "IWM" | "VTI" | "VOO" | "GLD" | "TLT" => "ETFs",
        _ => "Other",
    }
}
