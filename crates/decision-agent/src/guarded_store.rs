use std::sync::Arc;

use decision_core::{CoreError, CoreResult, Decision, DecisionStore, Outcome};
use resilience::{protected_call, CancellationToken, CircuitBreaker, ResilienceError, RetryPolicy};

/// Breaker name guarding decision persistence
pub const STORE_BREAKER: &str = "store";

/// [`DecisionStore`] calls routed through the `store` breaker and the retry policy.
pub struct GuardedStore {
    inner: Arc<dyn DecisionStore>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn DecisionStore>, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self {
            inner,
            breaker,
            retry,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn save(&self, decision: &Decision, cancel: &CancellationToken) -> CoreResult<()> {
        let inner = &self.inner;
        protected_call(&self.breaker, &self.retry, cancel, move || inner.save(decision))
            .await
            .map_err(into_core_error)
    }

    pub async fn update_outcome(
        &self,
        id: &str,
        outcome: Outcome,
        pnl: f64,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let inner = &self.inner;
        protected_call(&self.breaker, &self.retry, cancel, move || {
            inner.update_outcome(id, outcome, pnl)
        })
        .await
        .map_err(into_core_error)
    }
}

/// Map a protected-call failure onto [`CoreError`].
///
/// An open breaker becomes `Unavailable`, a failure that survived more than
/// one attempt becomes `RetriesExhausted`, and a single failed attempt is
/// returned as the collaborator's own error.
pub fn into_core_error(err: ResilienceError<CoreError>) -> CoreError {
    match err {
        ResilienceError::CircuitOpen { name } => {
            CoreError::Unavailable(format!("circuit '{}' is open", name))
        }
        ResilienceError::Exhausted { attempts, last } if attempts <= 1 => last,
        ResilienceError::Exhausted { attempts, last } => CoreError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        },
        ResilienceError::Operation(e) => e,
        other @ (ResilienceError::Cancelled | ResilienceError::DeadlineExceeded) => {
            CoreError::Cancelled(other.to_string())
        }
    }
}
