//! Error types for the vigil-events crate.

use thiserror::Error;

/// Errors that can occur while storing or delivering notification events.
///
/// An empty queue or a trigger without history is not an error; those come
/// back as `Ok(None)` and `Ok(vec![])`.
#[derive(Debug, Error)]
pub enum EventError {
    /// The backing store cannot be reached.
    #[error("event store unavailable: {reason}")]
    Unavailable {
        /// Why the store is unavailable.
        reason: String,
    },

    /// The journal file could not be read or written.
    #[error("journal error: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(String),

    /// Stored bytes could not be parsed back into an event.
    #[error("failed to decode event {payload}: {reason}")]
    Decode {
        /// The parser error.
        reason: String,
        /// The raw stored record.
        payload: String,
    },

    /// A sender failed to deliver an event.
    #[error("sender {sender} failed: {reason}")]
    SendFailed {
        /// The sender name.
        sender: String,
        /// The delivery failure.
        reason: String,
    },
}

impl EventError {
    /// Returns true for errors that mean stored data is corrupt rather than
    /// the store being unreachable.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

/// Result type for event operations.
pub type Result<T> = std::result::Result<T, EventError>;
