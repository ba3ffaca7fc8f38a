use async_trait::async_trait;

use crate::{
    CoreResult, Decision, MarketContext, OrderAck, OrderRequest, Outcome, PortfolioSnapshot,
    RiskAssessment, RiskRequest, SignalOpinion,
};

/// An independent signal agent. Failures are per-source and never block the others.
#[async_trait]
pub trait SignalProducer: Send + Sync {
    fn name(&self) -> &str;

    async fn produce(&self, symbol: &str, market: &MarketContext) -> CoreResult<Vec<SignalOpinion>>;
}

/// Portfolio/sector/size evaluation. The risk-reward veto is not part of this contract.
#[async_trait]
pub trait RiskEvaluator: Send + Sync {
    async fn evaluate(&self, request: &RiskRequest) -> CoreResult<RiskAssessment>;
}

/// Authoritative decision persistence
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn save(&self, decision: &Decision) -> CoreResult<()>;

    async fn update_outcome(&self, id: &str, outcome: Outcome, pnl: f64) -> CoreResult<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_trade(&self, symbol: &str, decision: &Decision) -> CoreResult<()>;

    async fn send_alert(&self, message: &str) -> CoreResult<()>;

    async fn send_error(&self, error: &str, context: &str) -> CoreResult<()>;
}

/// Broker-facing order placement. Only called for authorized decisions.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn submit_order(&self, order: &OrderRequest) -> CoreResult<OrderAck>;

    async fn portfolio(&self) -> CoreResult<PortfolioSnapshot>;

    /// Gateway name for logging
    fn gateway_name(&self) -> &str;
}
