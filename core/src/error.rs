use std::time::Duration;
use thiserror::Error;

/// Per-host failure captured into an [`crate::Outcome`]. Never returned from a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown command: {0}")]
    UnknownOperation(String),
    #[error("{operation}: {message}")]
    Parameter { operation: String, message: String },
    #[error("context cancelled")]
    Cancelled,
    #[error("{0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl DispatchError {
    pub fn parameter(operation: &str, message: impl Into<String>) -> Self {
        DispatchError::Parameter { operation: operation.to_string(), message: message.into() }
    }

    pub fn transport(message: impl std::fmt::Display) -> Self {
        DispatchError::Transport(message.to_string())
    }

    /// Short machine-readable name used by the CSV and JSON renderers.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownOperation(_) => "unknown_operation",
            DispatchError::Parameter { .. } => "parameter",
            DispatchError::Cancelled => "cancelled",
            DispatchError::Transport(_) => "transport",
            DispatchError::Timeout(_) => "timeout",
        }
    }
}
