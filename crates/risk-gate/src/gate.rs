use std::sync::Arc;

use decision_core::{RiskAssessment, RiskEvaluator, RiskRequest};
use resilience::{
    protected_call, CancellationToken, CircuitBreaker, FallbackRegistry, ResilienceError,
    RetryPolicy,
};

use crate::models::RiskConfig;

/// Breaker name guarding the risk evaluator
pub const RISK_BREAKER: &str = "risk";
/// Fallback name used when risk evaluation fails
pub const RISK_FALLBACK: &str = "risk_assessment";

/// Wraps a [`RiskEvaluator`] with the risk-reward veto and fail-closed handling.
///
/// The veto runs after the evaluator and cannot be undone downstream: an
/// assessment approved by the evaluator is still rejected when its
/// risk-reward ratio is below `min_risk_reward`.
pub struct RiskGate {
    evaluator: Arc<dyn RiskEvaluator>,
    config: RiskConfig,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    fallbacks: FallbackRegistry<RiskAssessment>,
}

impl RiskGate {
    pub fn new(
        evaluator: Arc<dyn RiskEvaluator>,
        config: RiskConfig,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        let fallbacks = FallbackRegistry::new();
        fallbacks.register(RISK_FALLBACK, |reason: &str| {
            RiskAssessment::rejected(format!("Risk evaluation could not complete: {}", reason))
        });
        Self {
            evaluator,
            config,
            breaker,
            retry,
            fallbacks,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Assess `request`, attaching `risk_reward` (computed from the winning
    /// opinions) and applying the minimum ratio veto.
    pub async fn assess(
        &self,
        request: &RiskRequest,
        risk_reward: Option<f64>,
        cancel: &CancellationToken,
    ) -> RiskAssessment {
        let evaluator = &self.evaluator;
        let result = protected_call(&self.breaker, &self.retry, cancel, move || {
            evaluator.evaluate(request)
        })
        .await;

        if let Err(e) = &result {
            match e {
                ResilienceError::CircuitOpen { .. } => tracing::warn!(
                    symbol = %request.symbol,
                    "Risk evaluator circuit open, rejecting"
                ),
                other => tracing::warn!(
                    symbol = %request.symbol,
                    error = %other,
                    "Risk evaluation failed, rejecting"
                ),
            }
        }

        let mut assessment = self
            .fallbacks
            .resolve(RISK_FALLBACK, result)
            .unwrap_or_else(|e| {
                RiskAssessment::rejected(format!("Risk evaluation could not complete: {}", e))
            });

        if risk_reward.is_some() {
            assessment.risk_reward_ratio = risk_reward;
        }
        self.apply_risk_reward_veto(&mut assessment);
        assessment
    }

    fn apply_risk_reward_veto(&self, assessment: &mut RiskAssessment) {
        let Some(ratio) = assessment.risk_reward_ratio else {
            return;
        };
        if ratio < self.config.min_risk_reward {
            tracing::debug!(
                ratio,
                minimum = self.config.min_risk_reward,
                "Risk-reward veto applied"
            );
            assessment.veto(format!(
                "Risk-reward ratio {:.2} below minimum {:.2}",
                ratio, self.config.min_risk_reward
            ));
        }
    }
}
