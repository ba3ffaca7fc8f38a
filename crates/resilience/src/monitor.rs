use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{CircuitBreakerRegistry, CircuitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Available,
    Degraded,
    Unavailable,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Available => "available",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Unavailable => "unavailable",
        }
    }
}

/// Rolling health record for one external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
}

impl ServiceHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ServiceStatus::Available,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            last_latency_ms: None,
        }
    }
}

/// Tracks availability of external services.
///
/// A service whose breaker (same name in the registry) is open is always
/// reported as unavailable, whatever its own failure streak says.
pub struct ServiceMonitor {
    registry: Arc<CircuitBreakerRegistry>,
    services: DashMap<String, ServiceHealth>,
    degraded_after: u32,
    unavailable_after: u32,
}

impl ServiceMonitor {
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self::with_thresholds(registry, 1, 3)
    }

    pub fn with_thresholds(
        registry: Arc<CircuitBreakerRegistry>,
        degraded_after: u32,
        unavailable_after: u32,
    ) -> Self {
        let degraded_after = degraded_after.max(1);
        Self {
            registry,
            services: DashMap::new(),
            degraded_after,
            unavailable_after: unavailable_after.max(degraded_after),
        }
    }

    pub fn record_success(&self, name: &str, latency: Duration) {
        let mut entry = self
            .services
            .entry(name.to_string())
            .or_insert_with(|| ServiceHealth::new(name));
        let health = entry.value_mut();
        if health.consecutive_failures > 0 {
            tracing::info!(service = name, "Service recovered");
        }
        health.consecutive_failures = 0;
        health.total_successes += 1;
        health.last_success = Some(Utc::now());
        health.last_latency_ms = Some(latency.as_millis() as u64);
    }

    pub fn record_failure(&self, name: &str, error: impl Display) {
        let mut entry = self
            .services
            .entry(name.to_string())
            .or_insert_with(|| ServiceHealth::new(name));
        let health = entry.value_mut();
        health.consecutive_failures += 1;
        health.total_failures += 1;
        health.last_failure = Some(Utc::now());
        health.last_error = Some(error.to_string());
        tracing::warn!(
            service = name,
            consecutive_failures = health.consecutive_failures,
            error = %error,
            "Service call failed"
        );
    }

    /// Current status. Services never observed are assumed available.
    pub fn status(&self, name: &str) -> ServiceStatus {
        let failures = self
            .services
            .get(name)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0);
        self.classify(name, failures)
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.status(name) != ServiceStatus::Unavailable
    }

    /// Health of every observed service, sorted by name.
    pub fn report(&self) -> Vec<ServiceHealth> {
        let mut report: Vec<ServiceHealth> = self
            .services
            .iter()
            .map(|entry| {
                let mut health = entry.value().clone();
                health.status = self.classify(&health.name, health.consecutive_failures);
                health
            })
            .collect();
        report.sort_by(|a, b| a.name.cmp(&b.name));
        report
    }

    /// Run `op`, timing it and recording the outcome under `name`.
    pub async fn observe<F, Fut, T, E>(&self, name: &str, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let result = op().await;
        match &result {
            Ok(_) => self.record_success(name, started.elapsed()),
            Err(e) => self.record_failure(name, e),
        }
        result
    }

    /// Startup connectivity check. Returns the resulting status.
    pub async fn probe<F, Fut, T, E>(&self, name: &str, check: F) -> ServiceStatus
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        match self.observe(name, check).await {
            Ok(_) => tracing::info!(service = name, "Probe succeeded"),
            Err(e) => tracing::warn!(service = name, error = %e, "Probe failed"),
        }
        self.status(name)
    }

    fn classify(&self, name: &str, failures: u32) -> ServiceStatus {
        let breaker_open = self
            .registry
            .find(name)
            .map(|b| b.state() == CircuitState::Open)
            .unwrap_or(false);
        if breaker_open || failures >= self.unavailable_after {
            ServiceStatus::Unavailable
        } else if failures >= self.degraded_after {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Available
        }
    }
}
