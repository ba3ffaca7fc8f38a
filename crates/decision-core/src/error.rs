use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Signal source error: {0}")]
    Signal(String),

    #[error("Risk evaluation error: {0}")]
    RiskEvaluation(String),

    #[error("Decision store error: {0}")]
    Store(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Execution error: {0}")]
    Execution(String),

    /// The service's breaker is open; the call was never made
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<CoreError> },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
