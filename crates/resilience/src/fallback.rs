use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

type FallbackFn<T> = Arc<dyn Fn(&str) -> T + Send + Sync>;

/// Named degraded-mode substitutes for failed calls.
///
/// A fallback receives the failure description and produces the value the
/// caller should continue with.
pub struct FallbackRegistry<T> {
    fallbacks: DashMap<String, FallbackFn<T>>,
}

impl<T> Default for FallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            fallbacks: DashMap::new(),
        }
    }

    /// Register (or replace) the fallback for `name`.
    pub fn register<F>(&self, name: impl Into<String>, fallback: F)
    where
        F: Fn(&str) -> T + Send + Sync + 'static,
    {
        self.fallbacks.insert(name.into(), Arc::new(fallback));
    }

    pub fn has(&self, name: &str) -> bool {
        self.fallbacks.contains_key(name)
    }

    /// Pass successes through; substitute the registered fallback for failures.
    ///
    /// Without a fallback for `name` the original error is returned.
    pub fn resolve<E: Display>(&self, name: &str, result: Result<T, E>) -> Result<T, E> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        // clone out of the map so the shard lock is not held while the fallback runs
        let Some(fallback) = self.fallbacks.get(name).map(|f| Arc::clone(f.value())) else {
            return Err(err);
        };
        let reason = err.to_string();
        tracing::warn!(fallback = name, error = %reason, "Using fallback after failure");
        Ok(fallback(&reason))
    }

    pub async fn call<F, Fut, E>(&self, name: &str, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let result = op().await;
        self.resolve(name, result)
    }
}
