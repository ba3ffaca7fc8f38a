pub mod evaluator;
pub mod gate;
pub mod models;

pub use evaluator::{symbol_to_sector, PortfolioRiskEvaluator};
pub use gate::{RiskGate, RISK_BREAKER, RISK_FALLBACK};
pub use models::*;
