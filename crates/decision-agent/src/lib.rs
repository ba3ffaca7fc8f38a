//! Decision-and-execution gating for the InvestIQ decision agent.
//!
//! [`DecisionPipeline`] runs one symbol through consensus, the risk gate and
//! the [`ExecutionAuthorizer`], records the result in the [`DecisionTracker`]
//! and persists it through a [`GuardedStore`]. Authorized decisions go to the
//! [`TradeExecutor`] when one is attached.

pub mod authorizer;
pub mod config;
pub mod executor;
pub mod guarded_store;
pub mod metrics;
pub mod paper;
pub mod pipeline;
pub mod signal_client;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use authorizer::{Authorization, AuthorizationPolicy, BlockReason, ExecutionAuthorizer};
pub use config::{AgentConfig, SignalSourceConfig};
pub use executor::{TradeExecutor, BROKER_BREAKER};
pub use guarded_store::{into_core_error, GuardedStore, STORE_BREAKER};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use paper::{ClosedTrade, PaperGateway};
pub use pipeline::{signal_breaker_name, DecisionPipeline, PipelineInput, PipelineOutput};
pub use signal_client::HttpSignalProducer;
pub use tracker::{AccuracyStats, DecisionRecord, DecisionTracker, OutcomeUpdate};
