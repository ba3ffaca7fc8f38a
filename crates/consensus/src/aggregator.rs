use std::collections::HashMap;

use decision_core::{clamp_confidence, Action, ConsensusResult, SignalOpinion};

use crate::AgentWeights;

/// Combines per-agent opinions into one action. Pure; no state between calls.
#[derive(Debug, Clone, Default)]
pub struct ConsensusAggregator {
    weights: AgentWeights,
}

impl ConsensusAggregator {
    pub fn new(weights: AgentWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &AgentWeights {
        &self.weights
    }

    /// Aggregate opinions keyed by agent name.
    ///
    /// Buckets are normalized by the sum of weights of the agents that
    /// actually responded. A bucket wins only when strictly greater than
    /// both others; anything else resolves to Hold. Contributions are summed
    /// in agent-name order so equal inputs always produce equal scores.
    pub fn aggregate(&self, opinions: &HashMap<String, SignalOpinion>) -> ConsensusResult {
        if opinions.is_empty() {
            return ConsensusResult::empty();
        }

        let mut buy = 0.0;
        let mut sell = 0.0;
        let mut hold = 0.0;
        let mut total_weight = 0.0;

        let mut ordered: Vec<(&String, &SignalOpinion)> = opinions.iter().collect();
        ordered.sort_unstable_by(|a, b| a.0.cmp(b.0));

        for (agent, opinion) in ordered {
            let weight = self.weights.weight_for(agent);
            let contribution = clamp_confidence(opinion.confidence) * weight;
            match opinion.recommendation {
                Action::Buy => buy += contribution,
                Action::Sell => sell += contribution,
                Action::Hold => hold += contribution,
            }
            total_weight += weight;
        }

        let (buy, sell, hold) = if total_weight > 0.0 {
            (
                clamp_confidence(buy / total_weight),
                clamp_confidence(sell / total_weight),
                clamp_confidence(hold / total_weight),
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        let (action, score) = if buy > sell && buy > hold {
            (Action::Buy, buy)
        } else if sell > buy && sell > hold {
            (Action::Sell, sell)
        } else {
            (Action::Hold, hold)
        };

        let agreeing = opinions
            .values()
            .filter(|o| o.recommendation == action)
            .count();

        tracing::debug!(
            action = %action,
            confidence = score,
            buy,
            sell,
            hold,
            agreeing,
            total = opinions.len(),
            "Consensus computed"
        );

        ConsensusResult {
            action,
            confidence: clamp_confidence(score),
            buy_score: buy,
            sell_score: sell,
            hold_score: hold,
            agreeing_agents: agreeing,
            total_agents: opinions.len(),
        }
    }
}
