use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ResilienceError;

/// Exponential backoff policy.
///
/// The delay after failed attempt `n` is `min(initial_delay * backoff_factor^(n-1), max_delay)`,
/// plus up to 25% random jitter when enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

const MAX_JITTER_FRACTION: f64 = 0.25;

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Base delay (without jitter) slept after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=MAX_JITTER_FRACTION);
        delay + delay.mul_f64(fraction)
    }

    /// Run `op` until it succeeds, attempts run out, or `cancel` fires.
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_until(cancel, None, op).await
    }

    /// Like [`execute`](Self::execute), additionally aborting once `deadline` passes.
    ///
    /// Cancellation and deadline expiry are reported as themselves, never as
    /// the last operation failure.
    pub async fn execute_until<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ResilienceError::DeadlineExceeded);
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                _ = wait_for(deadline) => return Err(ResilienceError::DeadlineExceeded),
                outcome = op() => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %err, "Retries exhausted");
                return Err(ResilienceError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.jittered(self.delay_for_attempt(attempt));
            tracing::debug!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                _ = wait_for(deadline) => return Err(ResilienceError::DeadlineExceeded),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_factor: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delay_grows_geometrically_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(p.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let p = RetryPolicy {
            jitter: true,
            ..policy(3)
        };
        for _ in 0..100 {
            let d = p.jittered(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(125));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn observed_delays_follow_the_schedule() {
        let p = policy(4);
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let result: Result<(), _> = p
            .execute(&cancel, || {
                let stamps = Arc::clone(&stamps);
                async move {
                    stamps.lock().push(Instant::now());
                    Err::<(), _>("down")
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(ResilienceError::Exhausted { attempts: 4, last: "down" })
        ));
        let stamps = stamps.lock();
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let p = policy(3);
        let calls = AtomicU32::new(0);
        let counted = &calls;
        let cancel = CancellationToken::new();

        let value = p
            .execute(&cancel, move || async move {
                if counted.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("flaky")
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_sleep_aborts_before_next_attempt() {
        let p = RetryPolicy {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            ..policy(5)
        };
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let counted = Arc::clone(&calls);
        let result: Result<(), _> = p
            .execute(&cancel, move || {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("down")
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), ResilienceError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_reported_distinctly() {
        let p = RetryPolicy {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(2),
            ..policy(5)
        };
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(3);

        let result: Result<(), _> = p
            .execute_until(&cancel, Some(deadline), || async { Err::<(), _>("down") })
            .await;
        assert_eq!(result.unwrap_err(), ResilienceError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn already_cancelled_never_runs() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let counted = &calls;

        let result: Result<(), _> = policy(3)
            .execute(&cancel, move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
