//! Error types for the vigil-server crate.

use thiserror::Error;
use vigil_checker::CheckerError;
use vigil_events::EventError;
use vigil_filter::FilterError;

/// Errors that can occur while configuring or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration is unreadable or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A file could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pattern parsing or matching failed.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// A trigger could not be registered.
    #[error(transparent)]
    Checker(#[from] CheckerError),

    /// The event store failed.
    #[error(transparent)]
    Events(#[from] EventError),

    /// A pipeline task panicked or was aborted.
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
