use thiserror::Error;

/// Location engine error types.
///
/// Only construction and configuration loading can fail. Estimation itself
/// recovers locally and never surfaces errors to subscribers.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No Tokio runtime available to spawn estimator tasks")]
    NoRuntime,

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
