//! Failure-tolerance primitives shared by every external call in the decision core.
//!
//! - [`CircuitBreaker`] / [`CircuitBreakerRegistry`]: named three-state breakers
//! - [`RetryPolicy`]: exponential backoff with jitter, cancellable through a
//!   [`CancellationToken`] or a deadline
//! - [`ServiceMonitor`]: availability tracking on top of the breaker registry
//! - [`FallbackRegistry`]: named degraded-mode substitutes

mod circuit_breaker;
mod error;
mod fallback;
mod monitor;
mod retry;

use std::fmt::Display;
use std::future::Future;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerInfo, CircuitBreakerRegistry,
    CircuitState,
};
pub use error::ResilienceError;
pub use fallback::FallbackRegistry;
pub use monitor::{ServiceHealth, ServiceMonitor, ServiceStatus};
pub use retry::RetryPolicy;
pub use tokio_util::sync::CancellationToken;

/// Retry `op` with each attempt going through `breaker`.
///
/// An open breaker makes an individual attempt fail fast, but the backoff
/// delay still elapses before the next attempt. If the final attempt was
/// rejected by the breaker the error is `CircuitOpen`.
pub async fn protected_call<F, Fut, T, E>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    policy
        .execute(cancel, move || {
            let fut = op();
            breaker.call(move || fut)
        })
        .await
        .map_err(ResilienceError::flatten)
}
