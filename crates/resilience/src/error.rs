use thiserror::Error;

/// Failure of a protected call.
///
/// `CircuitOpen` means the service is known-bad and the operation was never
/// invoked; `Exhausted` and `Operation` carry the operation's own error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResilienceError<E> {
    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Operation(E),
}

impl<E> ResilienceError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// True for both explicit cancellation and an expired deadline
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ResilienceError::Cancelled | ResilienceError::DeadlineExceeded
        )
    }

    /// The underlying operation error, if the operation ran at all.
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::Exhausted { last, .. } => Some(last),
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ResilienceError<ResilienceError<E>> {
    /// Collapse the nesting produced by retrying a breaker-protected call.
    ///
    /// If the last attempt hit an open breaker the result is `CircuitOpen`,
    /// not `Exhausted`.
    pub fn flatten(self) -> ResilienceError<E> {
        match self {
            ResilienceError::CircuitOpen { name } => ResilienceError::CircuitOpen { name },
            ResilienceError::Cancelled => ResilienceError::Cancelled,
            ResilienceError::DeadlineExceeded => ResilienceError::DeadlineExceeded,
            ResilienceError::Operation(inner) => inner,
            ResilienceError::Exhausted { attempts, last } => match last {
                ResilienceError::Operation(e) | ResilienceError::Exhausted { last: e, .. } => {
                    ResilienceError::Exhausted { attempts, last: e }
                }
                other => other,
            },
        }
    }
}
