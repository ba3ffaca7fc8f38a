use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::ResilienceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls fail fast until the reset timeout elapses
    Open,
    /// A single trial call is in progress
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Snapshot of a single breaker for dashboards and status reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerInfo {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Permit {
    Normal,
    Trial,
}

/// Three-state breaker guarding one external dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn info(&self) -> CircuitBreakerInfo {
        let inner = self.inner.lock();
        CircuitBreakerInfo {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.threshold(),
            reset_timeout_secs: self.config.reset_timeout.as_secs(),
        }
    }

    /// Manually close the breaker and clear its failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    /// Run `op` under the breaker.
    ///
    /// When open (or while a half-open trial is running) this returns
    /// `CircuitOpen` without invoking `op`.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.acquire() else {
            tracing::debug!(breaker = %self.name, "Circuit open, failing fast");
            return Err(ResilienceError::CircuitOpen {
                name: self.name.clone(),
            });
        };

        let mut guard = TrialGuard {
            breaker: self,
            permit,
            settled: false,
        };
        let result = op().await;
        guard.settled = true;

        match &result {
            Ok(_) => self.on_success(permit),
            Err(_) => self.on_failure(permit),
        }
        result.map_err(ResilienceError::Operation)
    }

    fn threshold(&self) -> u32 {
        self.config.failure_threshold.max(1)
    }

    fn acquire(&self) -> Option<Permit> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(Permit::Normal),
            CircuitState::Open => {
                let timeout_elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if !timeout_elapsed {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(breaker = %self.name, "Circuit half-open, allowing trial call");
                Some(Permit::Trial)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Permit::Trial)
                }
            }
        }
    }

    fn on_success(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        match permit {
            Permit::Trial => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                tracing::info!(breaker = %self.name, "Trial call succeeded, circuit closed");
            }
            Permit::Normal => {
                if inner.state == CircuitState::Closed {
                    inner.failure_count = 0;
                }
            }
        }
    }

    fn on_failure(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        match permit {
            Permit::Trial => {
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                inner.trial_in_flight = false;
                tracing::warn!(breaker = %self.name, "Trial call failed, circuit re-opened");
            }
            Permit::Normal => {
                if inner.state != CircuitState::Closed {
                    return;
                }
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                if inner.failure_count >= self.threshold() {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        reset_timeout_secs = self.config.reset_timeout.as_secs(),
                        "Circuit breaker tripped"
                    );
                }
            }
        }
    }
}

/// Releases the half-open trial slot if the trial future is dropped before completing.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.permit == Permit::Trial {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

/// Owns every named breaker. At most one instance exists per name.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: DashMap::new(),
        }
    }

    /// Get or lazily create the breaker for `name` with the default config.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with_config(name, self.default_config.clone())
    }

    /// Get or lazily create the breaker for `name`. `config` only applies on creation.
    pub fn get_with_config(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        // entry() holds the shard write lock, so concurrent creators agree on one instance
        let entry = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            });
        Arc::clone(entry.value())
    }

    /// Look up an existing breaker without creating one.
    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    pub fn snapshot(&self) -> Vec<CircuitBreakerInfo> {
        let mut infos: Vec<CircuitBreakerInfo> =
            self.breakers.iter().map(|b| b.value().info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
