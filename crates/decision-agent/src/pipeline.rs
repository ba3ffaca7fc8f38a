use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use consensus::ConsensusAggregator;
use decision_core::{
    Action, ConsensusResult, DailyCounters, Decision, DecisionStore, MarketContext, Notifier,
    Outcome, PortfolioSnapshot, RiskAssessment, RiskRequest, SignalOpinion, SignalProducer,
};
use futures_util::future::join_all;
use resilience::{
    protected_call, CancellationToken, CircuitBreakerInfo, CircuitBreakerRegistry, RetryPolicy,
    ServiceMonitor,
};
use risk_gate::RiskGate;
use serde::Serialize;

use crate::authorizer::{BlockReason, ExecutionAuthorizer};
use crate::executor::TradeExecutor;
use crate::guarded_store::{GuardedStore, STORE_BREAKER};
use crate::metrics::PipelineMetrics;
use crate::tracker::{AccuracyStats, DecisionRecord, DecisionTracker};

/// Per-call input to [`DecisionPipeline::process`].
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    pub market: MarketContext,
    pub portfolio: PortfolioSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub decision: Decision,
    /// All authorization gates passed
    pub should_execute: bool,
    pub block_reason: Option<BlockReason>,
    pub risk: RiskAssessment,
    /// Entry price of the strongest agreeing opinion, used as the limit price
    pub entry_price: Option<f64>,
}

/// Breaker name for a signal producer
pub fn signal_breaker_name(producer: &str) -> String {
    format!("signal:{}", producer)
}

/// Orchestrates consensus, risk, authorization and bookkeeping for one symbol at a time.
///
/// One instance per process; evaluations for different symbols may run
/// concurrently through a shared reference.
pub struct DecisionPipeline {
    producers: Vec<Arc<dyn SignalProducer>>,
    aggregator: ConsensusAggregator,
    risk_gate: RiskGate,
    authorizer: ExecutionAuthorizer,
    tracker: DecisionTracker,
    store: GuardedStore,
    notifier: Arc<dyn Notifier>,
    executor: Option<TradeExecutor>,
    breakers: Arc<CircuitBreakerRegistry>,
    monitor: Arc<ServiceMonitor>,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl DecisionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        aggregator: ConsensusAggregator,
        risk_gate: RiskGate,
        authorizer: ExecutionAuthorizer,
        tracker: DecisionTracker,
        store: Arc<dyn DecisionStore>,
        notifier: Arc<dyn Notifier>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            producers: Vec::new(),
            aggregator,
            risk_gate,
            authorizer,
            tracker,
            store: GuardedStore::new(store, breakers.get(STORE_BREAKER), retry.clone()),
            notifier,
            executor: None,
            monitor: Arc::new(ServiceMonitor::new(Arc::clone(&breakers))),
            breakers,
            retry,
            metrics: Arc::new(PipelineMetrics::default()),
        }
    }

    pub fn with_producer(mut self, producer: Arc<dyn SignalProducer>) -> Self {
        self.producers.push(producer);
        self
    }

    /// Authorized decisions are submitted through `executor`.
    pub fn with_executor(mut self, executor: TradeExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<ServiceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn monitor(&self) -> &Arc<ServiceMonitor> {
        &self.monitor
    }

    pub async fn process(
        &self,
        symbol: &str,
        input: &PipelineInput,
        cancel: &CancellationToken,
    ) -> PipelineOutput {
        self.process_at(symbol, input, cancel, Utc::now()).await
    }

    /// Evaluate `symbol` with `now` as the authorization time.
    pub async fn process_at(
        &self,
        symbol: &str,
        input: &PipelineInput,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> PipelineOutput {
        let opinions = self.collect_opinions(symbol, &input.market, cancel).await;
        let consensus = self.aggregator.aggregate(&opinions);
        let lead = leading_opinion(&opinions, &consensus);

        let entry_price = lead
            .and_then(|o| o.entry_price)
            .or(input.market.current_price);
        let risk_reward = match consensus.action {
            Action::Hold => None,
            _ => lead.and_then(SignalOpinion::risk_reward_ratio),
        };
        let request = RiskRequest {
            symbol: symbol.to_string(),
            action: consensus.action,
            confidence: consensus.confidence,
            entry_price,
            stop_loss: lead.and_then(|o| o.stop_loss),
            regime: input.market.regime.clone(),
            portfolio: input.portfolio.clone(),
        };
        let risk = self.risk_gate.assess(&request, risk_reward, cancel).await;

        let reasoning = describe(&consensus);
        let mut decision = Decision::new(symbol, consensus, risk, reasoning);
        decision.timestamp = now;

        let counters = self.tracker.counters();
        let authorization = self.authorizer.authorize(&mut decision, &counters, now);
        match &authorization.block_reason {
            Some(reason) => {
                decision.reasoning = format!("{}; Blocked: {}", decision.reasoning, reason);
                self.metrics.record_blocked(reason.gate());
            }
            None => decision.reasoning = format!("{}; Authorized", decision.reasoning),
        }
        self.metrics.record_decision();

        self.persist(&decision, cancel).await;

        if authorization.is_authorized() {
            if let Some(executor) = &self.executor {
                match executor.execute(&mut decision, entry_price, cancel).await {
                    Ok(_) => self.metrics.record_executed(),
                    Err(_) => self.metrics.record_execution_failure(),
                }
                // order reference or execution failure
                self.persist(&decision, cancel).await;
            }
        }

        if authorization.advisory {
            if let Err(e) = self.notifier.send_trade(symbol, &decision).await {
                tracing::warn!(symbol, error = %e, "Failed to send advisory notification");
                self.metrics.record_notification_failure();
            }
        }

        self.tracker.record(&decision);

        tracing::info!(
            symbol,
            action = %decision.action,
            confidence = format!("{:.1}", decision.confidence),
            agreement = %decision.consensus.agreement_label(),
            executed = decision.executed,
            "Decision recorded"
        );

        PipelineOutput {
            should_execute: authorization.is_authorized(),
            block_reason: authorization.block_reason,
            risk: decision.risk.clone(),
            entry_price,
            decision,
        }
    }

    /// Query every producer concurrently. Failing producers are skipped.
    async fn collect_opinions(
        &self,
        symbol: &str,
        market: &MarketContext,
        cancel: &CancellationToken,
    ) -> HashMap<String, SignalOpinion> {
        let calls = self.producers.iter().map(|producer| async move {
            let name = signal_breaker_name(producer.name());
            let breaker = self.breakers.get(&name);
            let result = self
                .monitor
                .observe(&name, || {
                    protected_call(&breaker, &self.retry, cancel, move || {
                        producer.produce(symbol, market)
                    })
                })
                .await;
            (producer.name().to_string(), result)
        });

        let mut opinions = HashMap::new();
        for (producer, result) in join_all(calls).await {
            match result {
                Ok(batch) => {
                    for mut opinion in batch {
                        if opinion.source.is_empty() {
                            opinion.source = producer.clone();
                        }
                        if opinions.contains_key(&opinion.source) {
                            tracing::debug!(source = %opinion.source, "Duplicate opinion ignored");
                            continue;
                        }
                        opinions.insert(opinion.source.clone(), opinion);
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol, producer = %producer, error = %e, "Signal source skipped");
                    self.metrics.record_source_failure();
                }
            }
        }
        opinions
    }

    async fn persist(&self, decision: &Decision, cancel: &CancellationToken) {
        if let Err(e) = self.store.save(decision, cancel).await {
            tracing::warn!(decision_id = %decision.id, error = %e, "Failed to persist decision");
            self.metrics.record_persistence_failure();
            self.report_error(&e.to_string(), "decision store").await;
        }
    }

    async fn report_error(&self, error: &str, context: &str) {
        if let Err(e) = self.notifier.send_error(error, context).await {
            tracing::warn!("Failed to report error ({}): {}", context, e);
            self.metrics.record_notification_failure();
        }
    }

    pub async fn record_outcome(&self, decision_id: &str, pnl: f64) -> DailyCounters {
        self.record_outcome_at(decision_id, pnl, Utc::now()).await
    }

    /// Feed a realized trade result back into the daily counters.
    ///
    /// Alerts once when this outcome is the one that reaches the daily loss
    /// or consecutive loss limit.
    pub async fn record_outcome_at(
        &self,
        decision_id: &str,
        pnl: f64,
        now: DateTime<Utc>,
    ) -> DailyCounters {
        let update = self.tracker.record_outcome(decision_id, pnl, now);
        let outcome = Outcome::from_pnl(pnl);

        // not tied to a scan cycle, so never cancelled
        let cancel = CancellationToken::new();
        if let Err(e) = self
            .store
            .update_outcome(decision_id, outcome, pnl, &cancel)
            .await
        {
            tracing::warn!(decision_id, error = %e, "Failed to persist outcome");
            self.metrics.record_persistence_failure();
            self.report_error(&e.to_string(), "decision store").await;
        }

        let policy = self.authorizer.policy();
        let mut alerts = Vec::new();
        if update.previous.daily_loss < policy.max_daily_loss
            && update.counters.daily_loss >= policy.max_daily_loss
        {
            alerts.push(
                BlockReason::DailyLossLimit {
                    loss: update.counters.daily_loss,
                    max: policy.max_daily_loss,
                }
                .to_string(),
            );
        }
        if policy.max_consecutive_losses > 0
            && update.previous.consecutive_losses < policy.max_consecutive_losses
            && update.counters.consecutive_losses >= policy.max_consecutive_losses
        {
            alerts.push(
                BlockReason::ConsecutiveLosses {
                    streak: update.counters.consecutive_losses,
                    max: policy.max_consecutive_losses,
                }
                .to_string(),
            );
        }
        for alert in alerts {
            tracing::warn!("{}", alert);
            if let Err(e) = self
                .notifier
                .send_alert(&format!("{}. Auto-execution paused until the next session.", alert))
                .await
            {
                tracing::warn!("Failed to send limit alert: {}", e);
                self.metrics.record_notification_failure();
            }
        }

        tracing::info!(
            decision_id,
            outcome = outcome.as_str(),
            pnl = format!("{:.2}", pnl),
            daily_loss = format!("{:.2}", update.counters.daily_loss),
            streak = update.counters.consecutive_losses,
            "Outcome recorded"
        );
        update.counters
    }

    /// Start a new trading session.
    pub fn reset_daily(&self) {
        self.tracker.reset_daily();
    }

    pub fn counters(&self) -> DailyCounters {
        self.tracker.counters()
    }

    pub fn accuracy(&self) -> AccuracyStats {
        self.tracker.accuracy_stats()
    }

    pub fn recent(&self, n: usize) -> Vec<DecisionRecord> {
        self.tracker.recent(n)
    }

    pub fn breaker_snapshot(&self) -> Vec<CircuitBreakerInfo> {
        self.breakers.snapshot()
    }
}

/// Highest-confidence opinion agreeing with the consensus action.
fn leading_opinion<'a>(
    opinions: &'a HashMap<String, SignalOpinion>,
    consensus: &ConsensusResult,
) -> Option<&'a SignalOpinion> {
    opinions
        .values()
        .filter(|o| o.recommendation == consensus.action)
        .max_by(|a, b| {
            a.confidence
                .total_cmp(&b.confidence)
                .then_with(|| b.source.cmp(&a.source))
        })
}

fn describe(consensus: &ConsensusResult) -> String {
    if consensus.total_agents == 0 {
        return "No signal sources responded".to_string();
    }
    format!(
        "{} consensus at {:.1}% ({} agents agree); {}",
        consensus.action,
        consensus.confidence,
        consensus.agreement_label(),
        consensus.score_summary()
    )
}
