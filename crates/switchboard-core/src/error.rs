use core::result::Result as CoreResult;
use std::io::Error as IoError;

use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Result type for core operations.
pub type Result<T> = CoreResult<T, Error>;

/// Errors that can occur while talking to an inference backend.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// An HTTP request failed before a status was received.
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend is unavailable or answered with an error status.
    #[error("Backend error{}: {message}", status_suffix(.status))]
    Backend {
        /// HTTP-like status code, when the backend reported one.
        status: Option<u16>,
        /// Human-readable failure description.
        message: String,
    },

    /// The call did not finish within its time budget.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The backend returned a payload that could not be interpreted.
    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

#[allow(clippy::ref_option, reason = "thiserror passes fields by reference")]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

impl Error {
    /// Creates a backend error with a status code.
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Creates a backend error for an unreachable backend.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Backend {
            status: None,
            message: message.into(),
        }
    }

    /// Determines whether this error may succeed if retried.
    ///
    /// Connection failures, timeouts, 5xx and 429 responses are transient; 4xx
    /// responses and local failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::Backend { status, .. } => {
                status.is_none_or(|code| code >= 500 || code == 429)
            }
            _ => false,
        }
    }

    /// Status code carried by backend errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => *status,
            Self::Request(error) => error.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}
