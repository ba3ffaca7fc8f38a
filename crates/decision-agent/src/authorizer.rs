use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use decision_core::{Action, DailyCounters, Decision, OperatingMode};
use serde::{Deserialize, Serialize};

/// Limits applied by the execution authorizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationPolicy {
    pub mode: OperatingMode,
    /// 0 to 100
    pub auto_execute_min_confidence: f64,
    pub max_daily_trades: u32,
    pub max_daily_loss: f64,
    pub trade_cooldown: Duration,
    /// 0 disables the streak check
    pub max_consecutive_losses: u32,
}

impl Default for AuthorizationPolicy {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Manual,
            auto_execute_min_confidence: 75.0,
            max_daily_trades: 10,
            max_daily_loss: 500.0,
            trade_cooldown: Duration::from_secs(300),
            max_consecutive_losses: 3,
        }
    }
}

/// Why a decision was not executed. Exactly one per blocked decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlockReason {
    ManualMode,
    NotifyOnly,
    InsufficientAgreement { agreeing: usize, total: usize },
    UnrecognizedMode(String),
    LowConfidence { confidence: f64, minimum: f64 },
    RiskRejected { violations: Vec<String> },
    DailyTradeLimit { count: u32, max: u32 },
    DailyLossLimit { loss: f64, max: f64 },
    Cooldown { remaining_secs: i64 },
    ConsecutiveLosses { streak: u32, max: u32 },
    HoldAction,
}

impl BlockReason {
    /// Stable gate identifier for metrics and logs
    pub fn gate(&self) -> &'static str {
        match self {
            BlockReason::ManualMode => "manual_mode",
            BlockReason::NotifyOnly => "notify_only",
            BlockReason::InsufficientAgreement { .. } => "agreement",
            BlockReason::UnrecognizedMode(_) => "unrecognized_mode",
            BlockReason::LowConfidence { .. } => "confidence",
            BlockReason::RiskRejected { .. } => "risk",
            BlockReason::DailyTradeLimit { .. } => "daily_trades",
            BlockReason::DailyLossLimit { .. } => "daily_loss",
            BlockReason::Cooldown { .. } => "cooldown",
            BlockReason::ConsecutiveLosses { .. } => "consecutive_losses",
            BlockReason::HoldAction => "hold",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::ManualMode => write!(f, "Manual mode: auto-execution disabled"),
            BlockReason::NotifyOnly => {
                write!(f, "Notify-only mode: advisory sent instead of executing")
            }
            BlockReason::InsufficientAgreement { agreeing, total } => write!(
                f,
                "Semi-auto mode requires unanimous agreement: {}/{} agents agree",
                agreeing, total
            ),
            BlockReason::UnrecognizedMode(mode) => {
                write!(f, "Unrecognized operating mode '{}': refusing to execute", mode)
            }
            BlockReason::LowConfidence {
                confidence,
                minimum,
            } => write!(
                f,
                "Confidence {:.1}% below auto-execute threshold {:.1}%",
                confidence, minimum
            ),
            BlockReason::RiskRejected { violations } => {
                if violations.is_empty() {
                    write!(f, "Risk check not approved")
                } else {
                    write!(f, "Risk check not approved: {}", violations.join("; "))
                }
            }
            BlockReason::DailyTradeLimit { count, max } => {
                write!(f, "Daily trade limit reached: {}/{} trades", count, max)
            }
            BlockReason::DailyLossLimit { loss, max } => write!(
                f,
                "Daily loss limit reached: ${:.2} lost of ${:.2} allowed",
                loss, max
            ),
            BlockReason::Cooldown { remaining_secs } => {
                write!(f, "Cooldown active: {} seconds remaining", remaining_secs)
            }
            BlockReason::ConsecutiveLosses { streak, max } => write!(
                f,
                "Consecutive loss limit reached: {} losses in a row (limit {})",
                streak, max
            ),
            BlockReason::HoldAction => write!(f, "Action is Hold: nothing to execute"),
        }
    }
}

/// Result of running the gate sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub block_reason: Option<BlockReason>,
    /// NotifyOnly mode: the caller should send an advisory notification
    pub advisory: bool,
}

impl Authorization {
    pub fn is_authorized(&self) -> bool {
        self.block_reason.is_none()
    }
}

/// Gating state machine deciding whether a decision may auto-execute.
///
/// Gates run in a fixed order and stop at the first failure:
/// mode (manual, notify-only, semi-auto agreement, unrecognized), confidence,
/// risk approval, daily trade count, daily loss, cooldown, loss streak, hold.
#[derive(Debug, Clone)]
pub struct ExecutionAuthorizer {
    policy: AuthorizationPolicy,
}

impl ExecutionAuthorizer {
    pub fn new(policy: AuthorizationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    /// Evaluate the gates and set `decision.executed` accordingly.
    ///
    /// Counters are only read here; they change when an outcome is recorded.
    pub fn authorize(
        &self,
        decision: &mut Decision,
        counters: &DailyCounters,
        now: DateTime<Utc>,
    ) -> Authorization {
        let block_reason = self.first_failing_gate(decision, counters, now);
        decision.executed = block_reason.is_none();

        match &block_reason {
            Some(reason) => tracing::debug!(
                symbol = %decision.symbol,
                gate = reason.gate(),
                reason = %reason,
                "Decision blocked"
            ),
            None => tracing::info!(
                symbol = %decision.symbol,
                action = %decision.action,
                confidence = decision.confidence,
                "Decision authorized for execution"
            ),
        }

        Authorization {
            advisory: self.policy.mode == OperatingMode::NotifyOnly,
            block_reason,
        }
    }

    fn first_failing_gate(
        &self,
        decision: &Decision,
        counters: &DailyCounters,
        now: DateTime<Utc>,
    ) -> Option<BlockReason> {
        let policy = &self.policy;

        match &policy.mode {
            OperatingMode::Manual => return Some(BlockReason::ManualMode),
            OperatingMode::NotifyOnly => return Some(BlockReason::NotifyOnly),
            OperatingMode::SemiAuto => {
                let consensus = &decision.consensus;
                if consensus.agreeing_agents < consensus.total_agents {
                    return Some(BlockReason::InsufficientAgreement {
                        agreeing: consensus.agreeing_agents,
                        total: consensus.total_agents,
                    });
                }
            }
            OperatingMode::Unrecognized(raw) => {
                return Some(BlockReason::UnrecognizedMode(raw.clone()))
            }
            OperatingMode::FullAuto => {}
        }

        if decision.confidence < policy.auto_execute_min_confidence {
            return Some(BlockReason::LowConfidence {
                confidence: decision.confidence,
                minimum: policy.auto_execute_min_confidence,
            });
        }

        if !decision.risk.approved {
            return Some(BlockReason::RiskRejected {
                violations: decision.risk.violations.clone(),
            });
        }

        if counters.trade_count >= policy.max_daily_trades {
            return Some(BlockReason::DailyTradeLimit {
                count: counters.trade_count,
                max: policy.max_daily_trades,
            });
        }

        if counters.daily_loss >= policy.max_daily_loss {
            return Some(BlockReason::DailyLossLimit {
                loss: counters.daily_loss,
                max: policy.max_daily_loss,
            });
        }

        if let Some(remaining_secs) = self.cooldown_remaining(counters, now) {
            return Some(BlockReason::Cooldown { remaining_secs });
        }

        if policy.max_consecutive_losses > 0
            && counters.consecutive_losses >= policy.max_consecutive_losses
        {
            return Some(BlockReason::ConsecutiveLosses {
                streak: counters.consecutive_losses,
                max: policy.max_consecutive_losses,
            });
        }

        if decision.action == Action::Hold {
            return Some(BlockReason::HoldAction);
        }

        None
    }

    /// Whole seconds (rounded up) left in the cooldown, if still active.
    fn cooldown_remaining(&self, counters: &DailyCounters, now: DateTime<Utc>) -> Option<i64> {
        let last = counters.last_trade_at?;
        let cooldown_ms = i64::try_from(self.policy.trade_cooldown.as_millis()).unwrap_or(i64::MAX);
        if cooldown_ms == 0 {
            return None;
        }
        // a last-trade stamp in the future counts as zero elapsed
        let elapsed_ms = (now - last).num_milliseconds().max(0);
        if elapsed_ms >= cooldown_ms {
            return None;
        }
        let remaining_ms = cooldown_ms - elapsed_ms;
        Some(remaining_ms.saturating_add(999) / 1000)
    }
}
