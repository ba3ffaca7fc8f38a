use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use consensus::{AgentWeights, ConsensusAggregator};
use decision_core::*;
use resilience::{
    CancellationToken, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    RetryPolicy,
};
use risk_gate::{RiskConfig, RiskGate, RISK_BREAKER};
use rust_decimal::Decimal;

use crate::*;

// ---- fakes ----

struct StaticProducer {
    name: String,
    opinions: Vec<SignalOpinion>,
}

#[async_trait]
impl SignalProducer for StaticProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, _symbol: &str, _market: &MarketContext) -> CoreResult<Vec<SignalOpinion>> {
        Ok(self.opinions.clone())
    }
}

struct FailingProducer {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl SignalProducer for FailingProducer {
    fn name(&self) -> &str {
        "broken"
    }

    async fn produce(&self, _symbol: &str, _market: &MarketContext) -> CoreResult<Vec<SignalOpinion>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::Signal("connection refused".to_string()))
    }
}

struct ApprovingEvaluator {
    size: f64,
}

#[async_trait]
impl RiskEvaluator for ApprovingEvaluator {
    async fn evaluate(&self, _request: &RiskRequest) -> CoreResult<RiskAssessment> {
        Ok(RiskAssessment {
            approved: true,
            violations: vec![],
            suggested_size: self.size,
            max_size: self.size * 2.0,
            portfolio_impact_pct: 1.0,
            sector_exposure_pct: 5.0,
            remaining_daily_loss: 500.0,
            risk_reward_ratio: None,
        })
    }
}

struct UnreachableEvaluator {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl RiskEvaluator for UnreachableEvaluator {
    async fn evaluate(&self, _request: &RiskRequest) -> CoreResult<RiskAssessment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::RiskEvaluation("risk service timed out".to_string()))
    }
}

#[derive(Default)]
struct MemoryStore {
    saves: AtomicU32,
    decisions: Mutex<HashMap<String, Decision>>,
    outcomes: Mutex<Vec<(String, Outcome, f64)>>,
    fail: bool,
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn save(&self, decision: &Decision) -> CoreResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CoreError::Store("disk full".to_string()));
        }
        self.decisions
            .lock()
            .unwrap()
            .insert(decision.id.clone(), decision.clone());
        Ok(())
    }

    async fn update_outcome(&self, id: &str, outcome: Outcome, pnl: f64) -> CoreResult<()> {
        self.outcomes.lock().unwrap().push((id.to_string(), outcome, pnl));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    trades: Mutex<Vec<(String, bool)>>,
    alerts: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_trade(&self, symbol: &str, decision: &Decision) -> CoreResult<()> {
        self.trades
            .lock()
            .unwrap()
            .push((symbol.to_string(), decision.executed));
        Ok(())
    }

    async fn send_alert(&self, message: &str) -> CoreResult<()> {
        self.alerts.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn send_error(&self, _error: &str, context: &str) -> CoreResult<()> {
        self.errors.lock().unwrap().push(context.to_string());
        Ok(())
    }
}

// ---- helpers ----

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap()
}

fn opinion(source: &str, action: Action, confidence: f64) -> SignalOpinion {
    SignalOpinion {
        source: source.to_string(),
        recommendation: action,
        confidence,
        entry_price: Some(100.0),
        stop_loss: Some(95.0),
        targets: vec![115.0],
        rationale: String::new(),
        timestamp: t0(),
    }
}

fn producer(source: &str, action: Action, confidence: f64) -> Arc<dyn SignalProducer> {
    Arc::new(StaticProducer {
        name: source.to_string(),
        opinions: vec![opinion(source, action, confidence)],
    })
}

fn weights() -> AgentWeights {
    AgentWeights::default()
        .with_weight("technical", 0.35)
        .with_weight("sentiment", 0.25)
        .with_weight("fundamental", 0.40)
}

struct Harness {
    pipeline: DecisionPipeline,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    registry: Arc<CircuitBreakerRegistry>,
}

fn harness_with(
    mode: OperatingMode,
    producers: Vec<Arc<dyn SignalProducer>>,
    store: MemoryStore,
    registry: CircuitBreakerRegistry,
) -> Harness {
    build_harness(
        mode,
        producers,
        store,
        registry,
        Arc::new(ApprovingEvaluator { size: 10.0 }),
        RetryPolicy::no_retry(),
    )
}

fn build_harness(
    mode: OperatingMode,
    producers: Vec<Arc<dyn SignalProducer>>,
    store: MemoryStore,
    registry: CircuitBreakerRegistry,
    evaluator: Arc<dyn RiskEvaluator>,
    risk_retry: RetryPolicy,
) -> Harness {
    let store = Arc::new(store);
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = Arc::new(registry);
    let risk_gate = RiskGate::new(
        evaluator,
        RiskConfig::default(),
        registry.get(RISK_BREAKER),
        risk_retry,
    );
    let policy = AuthorizationPolicy {
        mode,
        ..AuthorizationPolicy::default()
    };
    let mut pipeline = DecisionPipeline::new(
        ConsensusAggregator::new(weights()),
        risk_gate,
        ExecutionAuthorizer::new(policy),
        DecisionTracker::new(100),
        Arc::clone(&store) as Arc<dyn DecisionStore>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::clone(&registry),
        RetryPolicy::no_retry(),
    );
    for p in producers {
        pipeline = pipeline.with_producer(p);
    }
    Harness {
        pipeline,
        store,
        notifier,
        registry,
    }
}

fn harness(mode: OperatingMode, producers: Vec<Arc<dyn SignalProducer>>) -> Harness {
    harness_with(
        mode,
        producers,
        MemoryStore::default(),
        CircuitBreakerRegistry::default(),
    )
}

fn unanimous_buy(confidence: f64) -> Vec<Arc<dyn SignalProducer>> {
    vec![
        producer("technical", Action::Buy, confidence),
        producer("sentiment", Action::Buy, confidence),
        producer("fundamental", Action::Buy, confidence),
    ]
}

fn input() -> PipelineInput {
    PipelineInput {
        market: MarketContext::default(),
        portfolio: PortfolioSnapshot {
            cash: 100_000.0,
            total_value: 100_000.0,
            ..PortfolioSnapshot::default()
        },
    }
}

// ---- end-to-end ----

#[tokio::test]
async fn unanimous_weighted_buy_is_authorized_in_full_auto() {
    let h = harness(
        OperatingMode::FullAuto,
        vec![
            producer("technical", Action::Buy, 80.0),
            producer("sentiment", Action::Buy, 70.0),
            producer("fundamental", Action::Buy, 90.0),
        ],
    );
    let cancel = CancellationToken::new();

    let out = h.pipeline.process_at("AAPL", &input(), &cancel, t0()).await;

    assert_eq!(out.decision.action, Action::Buy);
    assert!((out.decision.confidence - 81.5).abs() < 1e-9);
    assert_eq!(out.decision.consensus.agreement_label(), "3/3");
    assert!(out.should_execute);
    assert!(out.decision.executed);
    assert!(out.block_reason.is_none());
    assert_eq!(out.risk.risk_reward_ratio, Some(3.0));
    assert_eq!(out.entry_price, Some(100.0));

    assert!(h.store.decisions.lock().unwrap().contains_key(&out.decision.id));
    let recent = h.pipeline.recent(1);
    assert_eq!(recent[0].id, out.decision.id);
    assert!(recent[0].executed);
}

#[tokio::test]
async fn semi_auto_requires_unanimous_agreement() {
    let h = harness(
        OperatingMode::SemiAuto,
        vec![
            producer("technical", Action::Buy, 80.0),
            producer("sentiment", Action::Buy, 70.0),
            producer("fundamental", Action::Sell, 60.0),
        ],
    );
    let cancel = CancellationToken::new();

    let out = h.pipeline.process_at("AAPL", &input(), &cancel, t0()).await;

    assert_eq!(out.decision.action, Action::Buy);
    assert!(!out.should_execute);
    assert!(!out.decision.executed);
    let reason = out.block_reason.unwrap();
    assert_eq!(
        reason,
        BlockReason::InsufficientAgreement {
            agreeing: 2,
            total: 3
        }
    );
    assert!(reason.to_string().contains("2/3 agents agree"));
    assert!(out.decision.reasoning.contains("2/3 agents agree"));
}

#[tokio::test]
async fn crossing_daily_loss_blocks_every_symbol() {
    let h = harness(OperatingMode::FullAuto, unanimous_buy(100.0));
    let cancel = CancellationToken::new();

    h.pipeline.record_outcome_at("t1", -499.0, t0()).await;
    assert!(h.notifier.alerts.lock().unwrap().is_empty());
    let counters = h.pipeline.record_outcome_at("t2", -2.0, t0()).await;
    assert_eq!(counters.daily_loss, 501.0);

    let later = t0() + chrono::Duration::hours(1);
    for symbol in ["AAPL", "MSFT"] {
        let out = h.pipeline.process_at(symbol, &input(), &cancel, later).await;
        assert_eq!(out.decision.confidence, 100.0);
        assert!(out.risk.approved);
        assert_eq!(
            out.block_reason,
            Some(BlockReason::DailyLossLimit {
                loss: 501.0,
                max: 500.0
            })
        );
        assert!(!out.decision.executed);
    }

    let alerts = h.notifier.alerts.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].starts_with("Daily loss limit reached"));
    assert_eq!(h.store.outcomes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn cooldown_reports_remaining_seconds() {
    let h = harness(OperatingMode::FullAuto, unanimous_buy(90.0));
    let cancel = CancellationToken::new();

    h.pipeline.record_outcome_at("t1", 25.0, t0()).await;
    let three_minutes_later = t0() + chrono::Duration::minutes(3);
    let out = h
        .pipeline
        .process_at("AAPL", &input(), &cancel, three_minutes_later)
        .await;

    let reason = out.block_reason.unwrap();
    assert_eq!(reason, BlockReason::Cooldown { remaining_secs: 120 });
    assert!(reason.to_string().contains("120 seconds remaining"));

    let after_cooldown = t0() + chrono::Duration::minutes(5);
    let out = h.pipeline.process_at("AAPL", &input(), &cancel, after_cooldown).await;
    assert!(out.should_execute);
}

#[tokio::test]
async fn notify_only_sends_advisory() {
    let h = harness(OperatingMode::NotifyOnly, unanimous_buy(90.0));
    let cancel = CancellationToken::new();

    let out = h.pipeline.process_at("NVDA", &input(), &cancel, t0()).await;

    assert_eq!(out.block_reason, Some(BlockReason::NotifyOnly));
    assert_eq!(
        h.notifier.trades.lock().unwrap().clone(),
        vec![("NVDA".to_string(), false)]
    );
}

#[tokio::test]
async fn manual_mode_never_notifies_trades() {
    let h = harness(OperatingMode::Manual, unanimous_buy(90.0));
    let out = h
        .pipeline
        .process_at("NVDA", &input(), &CancellationToken::new(), t0())
        .await;
    assert_eq!(out.block_reason, Some(BlockReason::ManualMode));
    assert!(h.notifier.trades.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unrecognized_mode_fails_closed() {
    let h = harness(OperatingMode::from("yolo"), unanimous_buy(100.0));
    let out = h
        .pipeline
        .process_at("AAPL", &input(), &CancellationToken::new(), t0())
        .await;
    assert_eq!(
        out.block_reason,
        Some(BlockReason::UnrecognizedMode("yolo".to_string()))
    );
    assert!(!out.decision.executed);
}

#[tokio::test]
async fn failing_source_is_skipped() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut producers = unanimous_buy(80.0);
    producers.truncate(2);
    producers.push(Arc::new(FailingProducer {
        calls: Arc::clone(&calls),
    }));
    let h = harness(OperatingMode::FullAuto, producers);

    let out = h
        .pipeline
        .process_at("AAPL", &input(), &CancellationToken::new(), t0())
        .await;

    assert_eq!(out.decision.consensus.total_agents, 2);
    assert_eq!(out.decision.action, Action::Buy);
    assert!((out.decision.confidence - 80.0).abs() < 1e-9);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.pipeline.metrics().snapshot().source_failures, 1);
}

#[tokio::test]
async fn repeated_source_failures_open_its_breaker() {
    let calls = Arc::new(AtomicU32::new(0));
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout: Duration::from_secs(60),
    });
    let h = harness_with(
        OperatingMode::FullAuto,
        vec![Arc::new(FailingProducer {
            calls: Arc::clone(&calls),
        })],
        MemoryStore::default(),
        registry,
    );
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let out = h.pipeline.process_at("AAPL", &input(), &cancel, t0()).await;
        assert_eq!(out.decision.action, Action::Hold);
        assert_eq!(out.decision.confidence, 0.0);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let breaker = h.registry.find(&signal_breaker_name("broken")).unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!h.pipeline.monitor().is_available("signal:broken"));
}

#[tokio::test]
async fn store_failure_does_not_block_authorization() {
    let h = harness_with(
        OperatingMode::FullAuto,
        unanimous_buy(90.0),
        MemoryStore {
            fail: true,
            ..MemoryStore::default()
        },
        CircuitBreakerRegistry::default(),
    );

    let out = h
        .pipeline
        .process_at("AAPL", &input(), &CancellationToken::new(), t0())
        .await;

    assert!(out.should_execute);
    assert!(out.decision.executed);
    assert_eq!(
        h.notifier.errors.lock().unwrap().clone(),
        vec!["decision store".to_string()]
    );
    assert_eq!(h.pipeline.metrics().snapshot().persistence_failures, 1);
    assert_eq!(h.pipeline.recent(5).len(), 1);
}

#[tokio::test]
async fn hold_consensus_is_blocked_last() {
    let h = harness(
        OperatingMode::FullAuto,
        vec![
            producer("technical", Action::Hold, 90.0),
            producer("sentiment", Action::Hold, 90.0),
        ],
    );
    let out = h
        .pipeline
        .process_at("KO", &input(), &CancellationToken::new(), t0())
        .await;
    assert_eq!(out.block_reason, Some(BlockReason::HoldAction));
    assert_eq!(out.risk.risk_reward_ratio, None);
}

#[tokio::test]
async fn third_loss_in_a_row_alerts_once() {
    let h = harness(OperatingMode::FullAuto, unanimous_buy(90.0));
    for (i, pnl) in [-10.0, -10.0, -10.0, -10.0].into_iter().enumerate() {
        h.pipeline.record_outcome_at(&format!("t{}", i), pnl, t0()).await;
    }
    let alerts = h.notifier.alerts.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("Consecutive loss limit reached: 3 losses in a row"));

    let out = h
        .pipeline
        .process_at("AAPL", &input(), &CancellationToken::new(), t0() + chrono::Duration::hours(1))
        .await;
    assert!(matches!(
        out.block_reason,
        Some(BlockReason::ConsecutiveLosses { streak: 4, max: 3 })
    ));

    h.pipeline.reset_daily();
    let out = h
        .pipeline
        .process_at("AAPL", &input(), &CancellationToken::new(), t0() + chrono::Duration::hours(1))
        .await;
    assert!(out.should_execute);
}

// ---- execution ----

fn harness_with_paper(cash: i64) -> (Harness, Arc<PaperGateway>) {
    let mut h = harness(OperatingMode::FullAuto, unanimous_buy(90.0));
    let gateway = Arc::new(PaperGateway::new(Decimal::from(cash)));
    let executor = TradeExecutor::new(
        Arc::clone(&gateway) as Arc<dyn ExecutionGateway>,
        h.registry.get(BROKER_BREAKER),
        RetryPolicy::no_retry(),
        Arc::clone(&h.notifier) as Arc<dyn Notifier>,
    );
    h.pipeline = h.pipeline.with_executor(executor);
    (h, gateway)
}

#[tokio::test]
async fn authorized_decision_is_filled_on_paper() {
    let (h, gateway) = harness_with_paper(100_000);

    let out = h
        .pipeline
        .process_at("AAPL", &input(), &CancellationToken::new(), t0())
        .await;

    assert!(out.decision.executed);
    assert_eq!(out.decision.order_ref.as_deref(), Some("paper-1"));
    assert_eq!(gateway.position("AAPL"), Decimal::from(10));

    let saved = h.store.decisions.lock().unwrap().get(&out.decision.id).cloned().unwrap();
    assert_eq!(saved.order_ref.as_deref(), Some("paper-1"));
    assert_eq!(
        h.notifier.trades.lock().unwrap().clone(),
        vec![("AAPL".to_string(), true)]
    );
    assert_eq!(h.pipeline.metrics().snapshot().executed, 1);
}

#[tokio::test]
async fn failed_order_marks_decision_not_executed() {
    let (h, gateway) = harness_with_paper(100);

    let out = h
        .pipeline
        .process_at("AAPL", &input(), &CancellationToken::new(), t0())
        .await;

    assert!(out.should_execute);
    assert!(!out.decision.executed);
    assert!(out.decision.reasoning.contains("Execution failed"));
    assert_eq!(gateway.position("AAPL"), Decimal::ZERO);
    assert!(!h.pipeline.recent(1)[0].executed);
    assert_eq!(
        h.notifier.errors.lock().unwrap().clone(),
        vec!["execution AAPL".to_string()]
    );
}

// ---- authorizer gate order ----

fn passing_decision() -> Decision {
    let consensus = ConsensusResult {
        action: Action::Buy,
        confidence: 90.0,
        buy_score: 90.0,
        sell_score: 0.0,
        hold_score: 0.0,
        agreeing_agents: 3,
        total_agents: 3,
    };
    let mut risk = RiskAssessment::rejected("placeholder");
    risk.approved = true;
    risk.violations.clear();
    risk.suggested_size = 10.0;
    Decision::new("AAPL", consensus, risk, "")
}

#[test]
fn gates_report_the_first_failure_in_order() {
    let authorizer = ExecutionAuthorizer::new(AuthorizationPolicy {
        mode: OperatingMode::FullAuto,
        ..AuthorizationPolicy::default()
    });
    let now = t0();

    // fails every gate from confidence onwards
    let mut decision = passing_decision();
    decision.confidence = 40.0;
    decision.action = Action::Hold;
    decision.risk.veto("Sector exposure too high");
    let mut counters = DailyCounters {
        trade_count: 10,
        daily_loss: 600.0,
        consecutive_losses: 5,
        last_trade_at: Some(now - chrono::Duration::seconds(10)),
    };

    let expect = |decision: &mut Decision, counters: &DailyCounters, gate: &str| {
        let auth = authorizer.authorize(decision, counters, now);
        assert_eq!(auth.block_reason.as_ref().map(BlockReason::gate), Some(gate));
        assert!(!decision.executed);
    };

    expect(&mut decision, &counters, "confidence");
    decision.confidence = 90.0;
    expect(&mut decision, &counters, "risk");
    decision.risk.approved = true;
    expect(&mut decision, &counters, "daily_trades");
    counters.trade_count = 1;
    expect(&mut decision, &counters, "daily_loss");
    counters.daily_loss = 0.0;
    expect(&mut decision, &counters, "cooldown");
    counters.last_trade_at = None;
    expect(&mut decision, &counters, "consecutive_losses");
    counters.consecutive_losses = 0;
    expect(&mut decision, &counters, "hold");
    decision.action = Action::Buy;

    let auth = authorizer.authorize(&mut decision, &counters, now);
    assert!(auth.is_authorized());
    assert!(decision.executed);
}

#[test]
fn mode_gates_come_before_everything_else() {
    let mut decision = passing_decision();
    decision.confidence = 10.0;
    decision.consensus.agreeing_agents = 1;
    let counters = DailyCounters::default();

    for (mode, gate) in [
        (OperatingMode::Manual, "manual_mode"),
        (OperatingMode::NotifyOnly, "notify_only"),
        (OperatingMode::SemiAuto, "agreement"),
        (OperatingMode::from("bogus"), "unrecognized_mode"),
        (OperatingMode::FullAuto, "confidence"),
    ] {
        let authorizer = ExecutionAuthorizer::new(AuthorizationPolicy {
            mode: mode.clone(),
            ..AuthorizationPolicy::default()
        });
        let auth = authorizer.authorize(&mut decision, &counters, t0());
        assert_eq!(auth.block_reason.unwrap().gate(), gate, "mode {}", mode);
        assert_eq!(auth.advisory, mode == OperatingMode::NotifyOnly);
    }
}

#[test]
fn risk_rejection_cites_violations() {
    let authorizer = ExecutionAuthorizer::new(AuthorizationPolicy {
        mode: OperatingMode::FullAuto,
        ..AuthorizationPolicy::default()
    });
    let mut decision = passing_decision();
    decision.risk.veto("Risk-reward ratio 1.20 below minimum 1.50");
    decision.risk.veto("Gross exposure too high");

    let reason = authorizer
        .authorize(&mut decision, &DailyCounters::default(), t0())
        .block_reason
        .unwrap();
    assert_eq!(
        reason.to_string(),
        "Risk check not approved: Risk-reward ratio 1.20 below minimum 1.50; Gross exposure too high"
    );
}

#[test]
fn cooldown_rounds_up_and_expires_exactly() {
    let authorizer = ExecutionAuthorizer::new(AuthorizationPolicy {
        mode: OperatingMode::FullAuto,
        ..AuthorizationPolicy::default()
    });
    let last = t0();
    let counters = DailyCounters {
        last_trade_at: Some(last),
        ..DailyCounters::default()
    };
    let mut decision = passing_decision();

    let at = last + chrono::Duration::milliseconds(180_500);
    let reason = authorizer.authorize(&mut decision, &counters, at).block_reason;
    assert_eq!(reason, Some(BlockReason::Cooldown { remaining_secs: 120 }));

    let at = last + chrono::Duration::milliseconds(299_999);
    let reason = authorizer.authorize(&mut decision, &counters, at).block_reason;
    assert_eq!(reason, Some(BlockReason::Cooldown { remaining_secs: 1 }));

    let at = last + chrono::Duration::minutes(5);
    assert!(authorizer.authorize(&mut decision, &counters, at).is_authorized());
}

#[test]
fn zero_streak_limit_disables_the_gate() {
    let authorizer = ExecutionAuthorizer::new(AuthorizationPolicy {
        mode: OperatingMode::FullAuto,
        max_consecutive_losses: 0,
        ..AuthorizationPolicy::default()
    });
    let counters = DailyCounters {
        consecutive_losses: 12,
        ..DailyCounters::default()
    };
    let mut decision = passing_decision();
    assert!(authorizer.authorize(&mut decision, &counters, t0()).is_authorized());
}

#[test]
fn saturated_cooldown_does_not_overflow() {
    let authorizer = ExecutionAuthorizer::new(AuthorizationPolicy {
        mode: OperatingMode::FullAuto,
        trade_cooldown: Duration::from_secs(u64::MAX),
        ..AuthorizationPolicy::default()
    });
    let counters = DailyCounters {
        last_trade_at: Some(t0()),
        ..DailyCounters::default()
    };
    let mut decision = passing_decision();

    let reason = authorizer.authorize(&mut decision, &counters, t0()).block_reason;
    assert_eq!(
        reason,
        Some(BlockReason::Cooldown {
            remaining_secs: i64::MAX / 1000
        })
    );
}

// ---- resilience around collaborators ----

#[tokio::test]
async fn dead_store_trips_its_breaker_without_blocking_decisions() {
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout: Duration::from_secs(60),
    });
    let h = harness_with(
        OperatingMode::FullAuto,
        unanimous_buy(90.0),
        MemoryStore {
            fail: true,
            ..MemoryStore::default()
        },
        registry,
    );
    let cancel = CancellationToken::new();

    for symbol in ["AAPL", "MSFT", "NVDA", "AMZN", "GOOG", "META", "TSLA", "KO", "PEP", "JPM"] {
        let out = h.pipeline.process_at(symbol, &input(), &cancel, t0()).await;
        assert!(out.should_execute);
    }

    assert_eq!(h.store.saves.load(Ordering::SeqCst), 2);
    let breaker = h.registry.find(STORE_BREAKER).unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(h.pipeline.metrics().snapshot().persistence_failures, 10);
    assert_eq!(h.pipeline.recent(20).len(), 10);
}

#[tokio::test]
async fn open_broker_circuit_is_reported_as_unavailable() {
    let gateway = Arc::new(PaperGateway::new(Decimal::from(100)));
    let notifier = Arc::new(RecordingNotifier::default());
    let breaker = Arc::new(CircuitBreaker::new(
        BROKER_BREAKER,
        CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        },
    ));
    let executor = TradeExecutor::new(
        gateway as Arc<dyn ExecutionGateway>,
        Arc::clone(&breaker),
        RetryPolicy::no_retry(),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    let cancel = CancellationToken::new();

    // 10 shares at 100 against 100 of cash
    let mut rejected = passing_decision();
    rejected.executed = true;
    let err = executor
        .execute(&mut rejected, Some(100.0), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Execution(_)));
    assert_eq!(breaker.state(), CircuitState::Open);

    let mut skipped = passing_decision();
    skipped.executed = true;
    let err = executor
        .execute(&mut skipped, Some(100.0), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::Unavailable("circuit 'broker' is open".to_string()));
    assert!(!skipped.executed);
    assert!(skipped.reasoning.contains("Execution failed: Service unavailable"));
}

#[tokio::test]
async fn repeated_broker_rejection_reports_exhaustion() {
    let gateway = Arc::new(PaperGateway::new(Decimal::from(100)));
    let executor = TradeExecutor::new(
        gateway as Arc<dyn ExecutionGateway>,
        Arc::new(CircuitBreaker::new(BROKER_BREAKER, CircuitBreakerConfig::default())),
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: false,
        },
        Arc::new(RecordingNotifier::default()) as Arc<dyn Notifier>,
    );

    let mut decision = passing_decision();
    decision.executed = true;
    let err = executor
        .execute(&mut decision, Some(100.0), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        CoreError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, CoreError::Execution(_)));
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_risk_retry_and_fails_closed() {
    let calls = Arc::new(AtomicU32::new(0));
    let h = build_harness(
        OperatingMode::FullAuto,
        unanimous_buy(90.0),
        MemoryStore::default(),
        CircuitBreakerRegistry::default(),
        Arc::new(UnreachableEvaluator {
            calls: Arc::clone(&calls),
        }),
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(120),
            backoff_factor: 2.0,
            jitter: false,
        },
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let out = h.pipeline.process_at("AAPL", &input(), &cancel, t0()).await;

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!out.risk.approved);
    assert!(out.risk.violations[0].contains("cancelled"));
    assert!(matches!(out.block_reason, Some(BlockReason::RiskRejected { .. })));
    assert!(!out.decision.executed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_symbols_share_one_tracker() {
    let h = harness(OperatingMode::FullAuto, unanimous_buy(90.0));
    let store = Arc::clone(&h.store);
    let pipeline = Arc::new(h.pipeline);
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    for i in 0..20 {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let symbol = format!("SYM{}", i);
            pipeline.process_at(&symbol, &input(), &cancel, t0()).await
        }));
    }
    let outcomes = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            for i in 0..5 {
                pipeline.record_outcome_at(&format!("closed{}", i), -1.0, t0()).await;
            }
        })
    };

    let mut ids = std::collections::HashSet::new();
    for task in tasks {
        let out = task.await.unwrap();
        ids.insert(out.decision.id);
    }
    outcomes.await.unwrap();

    assert_eq!(ids.len(), 20);
    assert_eq!(pipeline.recent(100).len(), 20);
    assert_eq!(store.decisions.lock().unwrap().len(), 20);
    assert_eq!(pipeline.metrics().snapshot().decisions, 20);

    let counters = pipeline.counters();
    assert_eq!(counters.trade_count, 5);
    assert_eq!(counters.daily_loss, 5.0);
    assert_eq!(counters.consecutive_losses, 5);
}
