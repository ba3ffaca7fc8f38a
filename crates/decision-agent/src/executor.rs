use std::sync::Arc;

use decision_core::{
    Action, CoreError, CoreResult, Decision, ExecutionGateway, Notifier, OrderAck, OrderRequest,
    OrderSide,
};
use resilience::{protected_call, CancellationToken, CircuitBreaker, RetryPolicy};
use rust_decimal::Decimal;

use crate::guarded_store::into_core_error;

/// Breaker name guarding order placement
pub const BROKER_BREAKER: &str = "broker";

/// Places orders for authorized decisions.
pub struct TradeExecutor {
    gateway: Arc<dyn ExecutionGateway>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    notifier: Arc<dyn Notifier>,
}

impl TradeExecutor {
    pub fn new(
        gateway: Arc<dyn ExecutionGateway>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            gateway,
            breaker,
            retry,
            notifier,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ExecutionGateway> {
        &self.gateway
    }

    /// Submit the order for an authorized decision.
    ///
    /// The decision id is the client order id, so a retried submission is
    /// deduplicated by the broker. On failure the decision is marked not
    /// executed and the failure is appended to its reasoning. An open broker
    /// circuit is reported as [`CoreError::Unavailable`].
    pub async fn execute(
        &self,
        decision: &mut Decision,
        limit_price: Option<f64>,
        cancel: &CancellationToken,
    ) -> CoreResult<OrderAck> {
        let result = self.submit(decision, limit_price, cancel).await;

        match &result {
            Ok(ack) => {
                decision.order_ref = Some(ack.order_id.clone());
                tracing::info!(
                    "Executed {} {} x{} via {} (order {})",
                    decision.action,
                    decision.symbol,
                    ack.filled_quantity,
                    self.gateway.gateway_name(),
                    ack.order_id
                );
            }
            Err(e) => {
                decision.executed = false;
                decision.reasoning = format!("{}; Execution failed: {}", decision.reasoning, e);
                tracing::error!(symbol = %decision.symbol, error = %e, "Order submission failed");
            }
        }

        match &result {
            Ok(_) => {
                if let Err(e) = self.notifier.send_trade(&decision.symbol, decision).await {
                    tracing::warn!("Failed to send trade notification: {}", e);
                }
            }
            Err(e) => {
                self.report_error(&e.to_string(), &format!("execution {}", decision.symbol))
                    .await
            }
        }

        result
    }

    async fn submit(
        &self,
        decision: &Decision,
        limit_price: Option<f64>,
        cancel: &CancellationToken,
    ) -> CoreResult<OrderAck> {
        if !decision.executed {
            return Err(CoreError::Execution(format!(
                "decision {} is not authorized",
                decision.id
            )));
        }
        let order = order_for(decision, limit_price)?;
        let gateway = &self.gateway;
        let order_ref = &order;

        protected_call(&self.breaker, &self.retry, cancel, move || {
            gateway.submit_order(order_ref)
        })
        .await
        .map_err(into_core_error)
    }

    async fn report_error(&self, error: &str, context: &str) {
        if let Err(e) = self.notifier.send_error(error, context).await {
            tracing::warn!("Failed to report error ({}): {}", context, e);
        }
    }
}

/// Build the broker order for a decision. Whole shares only.
pub fn order_for(decision: &Decision, limit_price: Option<f64>) -> CoreResult<OrderRequest> {
    let side = match decision.action {
        Action::Buy => OrderSide::Buy,
        Action::Sell => OrderSide::Sell,
        Action::Hold => {
            return Err(CoreError::Execution("Hold has no order to place".to_string()))
        }
    };

    let quantity = Decimal::from_f64_retain(decision.risk.suggested_size.floor())
        .filter(|q| *q > Decimal::ZERO)
        .ok_or_else(|| {
            CoreError::Execution(format!(
                "Suggested size {} is not a tradable quantity",
                decision.risk.suggested_size
            ))
        })?;

    let limit_price = match limit_price {
        Some(price) => Some(
            Decimal::from_f64_retain(price)
                .filter(|p| *p > Decimal::ZERO)
                .ok_or_else(|| CoreError::Execution(format!("Invalid limit price {}", price)))?
                .round_dp(2),
        ),
        None => None,
    };

    Ok(OrderRequest {
        client_order_id: decision.id.clone(),
        symbol: decision.symbol.clone(),
        side,
        quantity,
        limit_price,
    })
}
