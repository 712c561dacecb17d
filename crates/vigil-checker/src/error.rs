//! Error types for the vigil-checker crate.

use thiserror::Error;
use vigil_events::EventError;
use vigil_filter::FilterError;

/// Errors that can occur while dispatching or evaluating trigger checks.
#[derive(Debug, Error)]
pub enum CheckerError {
    /// The pattern index failed.
    #[error("pattern index error: {0}")]
    Index(#[from] FilterError),

    /// The notification queue failed.
    #[error("notification queue error: {0}")]
    Events(#[from] EventError),

    /// No trigger with this id is known to the evaluator.
    #[error("unknown trigger: {trigger_id}")]
    UnknownTrigger {
        /// The trigger id.
        trigger_id: String,
    },

    /// A trigger definition is invalid.
    #[error("invalid trigger {trigger_id}: {reason}")]
    InvalidTrigger {
        /// The trigger id.
        trigger_id: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for checker operations.
pub type Result<T> = std::result::Result<T, CheckerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_unknown_trigger() {
        let err = CheckerError::UnknownTrigger {
            trigger_id: "t1".to_string(),
        };
        assert_eq!(err.to_string(), "unknown trigger: t1");
    }

    #[test]
    fn error_display_invalid_trigger() {
        let err = CheckerError::InvalidTrigger {
            trigger_id: "t1".to_string(),
            reason: "no patterns".to_string(),
        };
        assert_eq!(err.to_string(), "invalid trigger t1: no patterns");
    }

    #[test]
    fn error_from_filter_error() {
        let err: CheckerError = FilterError::Unavailable {
            reason: "down".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "pattern index error: pattern index unavailable: down");
    }
}
