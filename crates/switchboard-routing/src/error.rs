use serde_json::Error as JsonError;
use std::io;
use std::result::Result as StdResult;
use switchboard_core::Error as CoreError;
use thiserror::Error;

pub type Result<T> = StdResult<T, RoutingError>;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] JsonError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("All {} ensemble models failed: {}", .failures.len(), .failures.join("; "))]
    AllModelsFailed { failures: Vec<String> },

    #[error("Execution failed on {model}: {message}")]
    ExecutionFailed {
        model: String,
        message: String,
        retryable: bool,
    },

    #[error("Model catalog is empty")]
    EmptyCatalog,

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("{0}")]
    Other(String),
}

impl RoutingError {
    /// Builds an execution failure from a backend error, keeping its retry class.
    pub fn execution(model: impl Into<String>, error: &CoreError) -> Self {
        Self::ExecutionFailed {
            model: model.into(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Core(error) => error.is_retryable(),
            Self::Timeout(_) => true,
            Self::ExecutionFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
