use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use consensus::ConsensusAggregator;
use decision_agent::{
    signal_breaker_name, AgentConfig, DecisionPipeline, DecisionTracker, ExecutionAuthorizer,
    HttpSignalProducer, PaperGateway, PipelineInput, PipelineMetrics, TradeExecutor,
    BROKER_BREAKER,
};
use decision_core::{ExecutionGateway, MarketContext, Notifier};
use decision_store::SqlDecisionStore;
use futures_util::future::join_all;
use notification_service::NotificationService;
use resilience::{CancellationToken, CircuitBreakerRegistry, ServiceMonitor, ServiceStatus};
use risk_gate::{PortfolioRiskEvaluator, RiskGate, RISK_BREAKER};
use rust_decimal::Decimal;
use tokio::signal::unix::SignalKind;
use tokio::time;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting InvestIQ Decision Agent");

    // 2. Configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Operating mode: {}", config.operating_mode);
    tracing::info!(
        "  Auto-execute threshold: {:.0}%",
        config.auto_execute_min_confidence
    );
    tracing::info!(
        "  Daily limits: {} trades, ${:.2} loss, {} consecutive losses",
        config.max_daily_trades,
        config.max_daily_loss,
        config.max_consecutive_losses
    );
    tracing::info!("  Trade cooldown: {}s", config.trade_cooldown_seconds);
    tracing::info!("  Scan interval: {}s", config.scan_interval_seconds);

    // 3. Resilience layer
    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_config()));
    let monitor = Arc::new(ServiceMonitor::new(Arc::clone(&breakers)));
    let retry = config.retry_policy();

    // 4. Decision store
    let store = Arc::new(
        SqlDecisionStore::connect(&config.database_url)
            .await
            .context("Failed to open decision store")?,
    );
    store.init_tables().await?;
    let db_status = monitor
        .probe("database", || sqlx::query("SELECT 1").execute(store.pool()))
        .await;
    if db_status != ServiceStatus::Available {
        anyhow::bail!("Database connectivity check failed ({})", config.database_url);
    }
    tracing::info!("Startup check: database OK");

    // 5. Notifications and execution
    let notifier = Arc::new(NotificationService::new(
        &config.notification_config(),
        &breakers,
    ));
    tracing::info!("Notification service ready ({} channels)", notifier.channel_count());

    let starting_cash = Decimal::try_from(config.paper_starting_cash)
        .context("PAPER_STARTING_CASH is not representable")?;
    let gateway = Arc::new(PaperGateway::new(starting_cash));
    tracing::info!("Paper trading mode (starting cash ${})", starting_cash);

    let executor = TradeExecutor::new(
        Arc::clone(&gateway) as Arc<dyn ExecutionGateway>,
        breakers.get(BROKER_BREAKER),
        retry.clone(),
        Arc::clone(&notifier) as _,
    );

    // 6. Pipeline
    let risk_gate = RiskGate::new(
        Arc::new(PortfolioRiskEvaluator::new(config.risk_config())),
        config.risk_config(),
        breakers.get(RISK_BREAKER),
        retry.clone(),
    );
    let metrics = Arc::new(PipelineMetrics::new(config.metrics_log_interval));
    let mut pipeline = DecisionPipeline::new(
        ConsensusAggregator::new(config.agent_weights.clone()),
        risk_gate,
        ExecutionAuthorizer::new(config.authorization_policy()),
        DecisionTracker::new(config.decision_history_size),
        Arc::clone(&store) as _,
        Arc::clone(&notifier) as _,
        Arc::clone(&breakers),
        retry,
    )
    .with_monitor(Arc::clone(&monitor))
    .with_metrics(Arc::clone(&metrics))
    .with_executor(executor);

    let health_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    for source in &config.signal_sources {
        let producer = HttpSignalProducer::new(
            source,
            Duration::from_secs(config.signal_timeout_seconds),
        )?;
        // warn-only; the breaker takes over once scanning starts
        let health_url = format!("{}/health", source.url);
        monitor
            .probe(&signal_breaker_name(&source.name), || async {
                health_client.get(&health_url).send().await?.error_for_status()
            })
            .await;
        pipeline = pipeline.with_producer(Arc::new(producer));
    }
    if pipeline.producer_count() == 0 {
        tracing::warn!("No SIGNAL_SOURCES configured: every decision will be Hold");
    }
    let pipeline = Arc::new(pipeline);

    if let Err(e) = notifier
        .send_alert(&format!(
            "Decision agent started in {} mode\nWatchlist: {} symbols | Scan interval: {}s",
            config.operating_mode,
            config.watchlist.len(),
            config.scan_interval_seconds
        ))
        .await
    {
        tracing::warn!("Failed to send startup notification: {}", e);
    }

    tracing::info!(
        "Agent is now running. Scanning every {}s. Press Ctrl+C to stop.",
        config.scan_interval_seconds
    );

    // 7. Main loop with graceful shutdown (SIGINT + SIGTERM)
    let cancel = CancellationToken::new();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
        // aborts in-flight retries and backoff sleeps
        shutdown.cancel();
    });

    let mut session_date = eastern_date();
    let mut interval = time::interval(Duration::from_secs(config.scan_interval_seconds));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                break;
            }
            _ = interval.tick() => {
                let today = eastern_date();
                if today != session_date {
                    tracing::info!("New trading session {}", today);
                    pipeline.reset_daily();
                    gateway.start_session();
                    session_date = today;
                }

                if let Err(e) = run_cycle(&pipeline, &gateway, &config, &cancel).await {
                    tracing::error!("Error in decision cycle: {}", e);
                    notifier.send_error(&e.to_string(), "decision cycle").await.ok();
                }
            }
        }
    }

    metrics.log_metrics();
    let stats = pipeline.accuracy();
    tracing::info!(
        decisions = stats.total_decisions,
        executed = stats.executed,
        win_rate = format!("{:.1}%", stats.win_rate),
        "Session accuracy"
    );
    notifier
        .send_alert("Decision agent stopped (graceful shutdown)")
        .await
        .ok();
    tracing::info!("Decision agent shut down.");
    Ok(())
}

async fn run_cycle(
    pipeline: &DecisionPipeline,
    gateway: &PaperGateway,
    config: &AgentConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let cycle_start = PipelineMetrics::start_timer();
    tracing::info!("Starting decision cycle...");

    for trade in gateway.take_closed_trades() {
        pipeline.record_outcome(&trade.decision_id, trade.pnl).await;
    }

    let input = PipelineInput {
        market: MarketContext {
            regime: config.market_regime.clone(),
            current_price: None,
        },
        portfolio: gateway.portfolio().await?,
    };

    let outputs = join_all(
        config
            .watchlist
            .iter()
            .map(|symbol| pipeline.process(symbol, &input, cancel)),
    )
    .await;

    let executed = outputs.iter().filter(|o| o.decision.executed).count();
    for output in &outputs {
        if let Some(reason) = &output.block_reason {
            tracing::debug!("{}: {}", output.decision.symbol, reason);
        }
    }
    tracing::info!(
        "Cycle complete: {} symbols evaluated, {} executed",
        outputs.len(),
        executed
    );

    pipeline.metrics().finish_cycle(cycle_start);
    Ok(())
}

fn eastern_date() -> String {
    chrono::Utc::now()
        .with_timezone(&chrono_tz::US::Eastern)
        .format("%Y-%m-%d")
        .to_string()
}
