//! Daemon error types

use thiserror::Error;

/// Errors raised while wiring or running the daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon-specific result type
pub type Result<T> = std::result::Result<T, DaemonError>;

impl From<procyon_core::CoreError> for DaemonError {
    fn from(err: procyon_core::CoreError) -> Self {
        DaemonError::Config(err.to_string())
    }
}
