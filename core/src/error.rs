//! Core error types and utilities

use thiserror::Error;

/// Errors surfaced by the supervision engine
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("no process named '{name}'")]
    NotFound {
        /// The unknown process name
        name: String,
    },

    #[error("process '{name}' is already running")]
    AlreadyRunning {
        /// The process name
        name: String,
    },

    #[error("process '{name}' is not running")]
    NotRunning {
        /// The process name
        name: String,
    },

    #[error("failed to spawn process '{name}': {reason}")]
    SpawnFailed {
        /// The process name
        name: String,
        /// OS error text
        reason: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("process error: {0}")]
    Process(String),
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Short machine-readable label for the error kind, used as the
    /// `error` field of HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "not_found",
            CoreError::AlreadyRunning { .. } => "already_running",
            CoreError::NotRunning { .. } => "not_running",
            CoreError::SpawnFailed { .. } => "spawn_failed",
            CoreError::InvalidRequest(_) => "invalid_request",
            CoreError::Storage(_) => "storage",
            CoreError::ShuttingDown => "shutting_down",
            CoreError::Configuration(_) => "configuration",
            CoreError::Validation(_) => "validation",
            CoreError::Io(_) => "io",
            CoreError::Process(_) => "process",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = CoreError::NotFound {
            name: "web".to_string(),
        };
        assert_eq!(err.to_string(), "no process named 'web'");

        let err = CoreError::AlreadyRunning {
            name: "web".to_string(),
        };
        assert_eq!(err.to_string(), "process 'web' is already running");
    }

    #[test]
    fn kinds() {
        assert_eq!(
            CoreError::NotRunning {
                name: "x".to_string()
            }
            .kind(),
            "not_running"
        );
        assert_eq!(CoreError::InvalidRequest("empty".to_string()).kind(), "invalid_request");
        assert_eq!(CoreError::ShuttingDown.kind(), "shutting_down");
    }
}
