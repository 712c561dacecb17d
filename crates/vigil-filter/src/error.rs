//! Error types for the vigil-filter crate.

use thiserror::Error;
use vigil_metrics::MetricsError;

/// Errors that can occur while matching or persisting metrics.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The series archive rejected an operation.
    #[error("archive error: {0}")]
    Archive(#[from] MetricsError),

    /// The pattern index cannot be reached.
    #[error("pattern index unavailable: {reason}")]
    Unavailable {
        /// Why the index is unavailable.
        reason: String,
    },

    /// An ingested line is not `name value timestamp`.
    #[error("invalid metric line {line:?}: {reason}")]
    InvalidLine {
        /// The offending line.
        line: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A pattern could not be parsed.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for filter operations.
pub type Result<T> = std::result::Result<T, FilterError>;
