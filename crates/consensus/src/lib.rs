//! Weighted multi-agent consensus.
//!
//! Each signal agent's confidence is scaled by its configured weight and
//! accumulated per recommended action; the strictly highest normalized
//! bucket wins and ties fall back to Hold.

mod aggregator;
mod weights;

pub use aggregator::ConsensusAggregator;
pub use weights::{AgentWeights, WeightParseError, DEFAULT_UNKNOWN_WEIGHT};
