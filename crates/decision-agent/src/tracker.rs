use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use decision_core::{clamp_confidence, Action, DailyCounters, Decision, Outcome};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_SIZE: usize = 1000;

const CONFIDENCE_RANGES: [&str; 6] = ["0-49%", "50-59%", "60-69%", "70-79%", "80-89%", "90-100%"];

/// Summary of one decision kept for accuracy reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub confidence: f64,
    pub executed: bool,
    pub outcome: Outcome,
    pub realized_pnl: Option<f64>,
}

impl From<&Decision> for DecisionRecord {
    fn from(decision: &Decision) -> Self {
        Self {
            id: decision.id.clone(),
            symbol: decision.symbol.clone(),
            timestamp: decision.timestamp,
            action: decision.action,
            confidence: decision.confidence,
            executed: decision.executed,
            outcome: decision.outcome,
            realized_pnl: decision.realized_pnl,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBucket {
    pub range: String,
    pub decisions: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percentage of resolved decisions that won
    pub win_rate: f64,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyStats {
    pub total_decisions: usize,
    pub executed: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub buckets: Vec<ConfidenceBucket>,
}

/// Map a 0-100 confidence onto its reporting bucket.
pub fn confidence_range(confidence: f64) -> &'static str {
    match clamp_confidence(confidence) as u32 {
        90..=100 => "90-100%",
        80..=89 => "80-89%",
        70..=79 => "70-79%",
        60..=69 => "60-69%",
        50..=59 => "50-59%",
        _ => "0-49%",
    }
}

/// Counters before and after an outcome was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeUpdate {
    /// Whether the decision was still in the history ring
    pub found: bool,
    pub previous: DailyCounters,
    pub counters: DailyCounters,
}

struct TrackerState {
    records: VecDeque<DecisionRecord>,
    counters: DailyCounters,
}

/// Bounded decision history plus the daily counters fed to the authorizer.
///
/// Every read and write of the counters goes through one lock, so an
/// outcome recorded concurrently with an authorization is seen either fully
/// or not at all.
pub struct DecisionTracker {
    capacity: usize,
    state: RwLock<TrackerState>,
}

impl Default for DecisionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl DecisionTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: RwLock::new(TrackerState {
                records: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_SIZE)),
                counters: DailyCounters::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a decision summary, evicting the oldest beyond capacity.
    pub fn record(&self, decision: &Decision) {
        let mut state = self.state.write();
        state.records.push_back(DecisionRecord::from(decision));
        while state.records.len() > self.capacity {
            state.records.pop_front();
        }
    }

    /// Attach an outcome to a decision and update the daily counters.
    ///
    /// Counters are updated even when the record is no longer in the ring.
    pub fn record_outcome(&self, id: &str, pnl: f64, now: DateTime<Utc>) -> OutcomeUpdate {
        let outcome = Outcome::from_pnl(pnl);
        let mut state = self.state.write();

        let found = match state.records.iter_mut().rev().find(|r| r.id == id) {
            Some(record) => {
                record.outcome = outcome;
                record.realized_pnl = Some(pnl);
                true
            }
            None => false,
        };

        let previous = state.counters.clone();
        let counters = &mut state.counters;
        counters.trade_count = counters.trade_count.saturating_add(1);
        counters.last_trade_at = Some(now);
        match outcome {
            Outcome::Loss => {
                counters.daily_loss += pnl.abs();
                counters.consecutive_losses = counters.consecutive_losses.saturating_add(1);
            }
            _ => counters.consecutive_losses = 0,
        }

        let counters = counters.clone();
        drop(state);

        if !found {
            tracing::warn!(decision_id = id, "Outcome recorded for decision not in history");
        }
        OutcomeUpdate {
            found,
            previous,
            counters,
        }
    }

    pub fn counters(&self) -> DailyCounters {
        self.state.read().counters.clone()
    }

    /// Start a new trading session. History is kept.
    pub fn reset_daily(&self) {
        self.state.write().counters = DailyCounters::default();
        tracing::info!("Daily counters reset");
    }

    /// Most recent `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<DecisionRecord> {
        self.state.read().records.iter().rev().take(n).cloned().collect()
    }

    pub fn accuracy_stats(&self) -> AccuracyStats {
        let state = self.state.read();
        let mut buckets: Vec<ConfidenceBucket> = CONFIDENCE_RANGES
            .iter()
            .map(|range| ConfidenceBucket {
                range: range.to_string(),
                ..ConfidenceBucket::default()
            })
            .collect();
        let mut stats = AccuracyStats {
            total_decisions: state.records.len(),
            ..AccuracyStats::default()
        };

        for record in &state.records {
            let range = confidence_range(record.confidence);
            let Some(bucket) = buckets.iter_mut().find(|b| b.range == range) else {
                continue;
            };
            bucket.decisions += 1;
            if record.executed {
                stats.executed += 1;
            }
            let pnl = record.realized_pnl.unwrap_or(0.0);
            match record.outcome {
                Outcome::Win => {
                    bucket.wins += 1;
                    stats.wins += 1;
                }
                Outcome::Loss => {
                    bucket.losses += 1;
                    stats.losses += 1;
                }
                Outcome::Pending => continue,
            }
            bucket.total_pnl += pnl;
            stats.total_pnl += pnl;
        }

        for bucket in &mut buckets {
            bucket.win_rate = win_rate(bucket.wins, bucket.losses);
        }
        stats.win_rate = win_rate(stats.wins, stats.losses);
        stats.buckets = buckets;
        stats
    }
}

fn win_rate(wins: usize, losses: usize) -> f64 {
    let resolved = wins + losses;
    if resolved == 0 {
        0.0
    } else {
        wins as f64 / resolved as f64 * 100.0
    }
}
