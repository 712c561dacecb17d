//! Notification event model.
//!
//! - [`State`]: the evaluated state of a trigger
//! - [`NotificationEvent`]: one unit of evaluated alert state to deliver

use serde::{Deserialize, Serialize};

use crate::error::{EventError, Result};

/// The evaluated state of a trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    /// Every value is within thresholds.
    #[default]
    Ok,
    /// A value crossed the warning threshold.
    Warn,
    /// A value crossed the error threshold.
    Error,
    /// No values were found.
    NoData,
    /// A manually requested test notification.
    Test,
    /// The evaluation itself failed.
    Exception,
}

impl State {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::NoData => "NODATA",
            Self::Test => "TEST",
            Self::Exception => "EXCEPTION",
        }
    }

    /// Returns how severe the state is; higher is worse.
    #[must_use]
    pub const fn score(&self) -> u32 {
        match self {
            Self::Ok | Self::Test => 0,
            Self::Warn => 1,
            Self::Error => 100,
            Self::NoData => 1_000,
            Self::Exception => 100_000,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of evaluated alert state destined for delivery.
///
/// Optional fields are left out of the stored record when unset and default
/// when missing, so records written before a field existed still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// The trigger that produced the event; empty for ad-hoc test events.
    #[serde(default)]
    pub trigger_id: String,
    /// The subscription a test event is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// The contact a test event is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    /// The series the state was computed from.
    #[serde(default)]
    pub metric: String,
    /// The value that produced the state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// The new state.
    pub state: State,
    /// The previously known state.
    #[serde(default)]
    pub old_state: State,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Free-form message for senders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NotificationEvent {
    /// Creates a new event for a trigger state transition.
    #[must_use]
    pub fn new(
        trigger_id: impl Into<String>,
        metric: impl Into<String>,
        state: State,
        old_state: State,
        timestamp: i64,
    ) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            subscription_id: None,
            contact_id: None,
            metric: metric.into(),
            value: None,
            state,
            old_state,
            timestamp,
            message: None,
        }
    }

    /// Creates a test event addressed to a subscription.
    #[must_use]
    pub fn test_for_subscription(subscription_id: impl Into<String>) -> Self {
        let mut event = Self::test_event();
        event.subscription_id = Some(subscription_id.into());
        event
    }

    /// Creates a test event addressed to a contact.
    #[must_use]
    pub fn test_for_contact(contact_id: impl Into<String>) -> Self {
        let mut event = Self::test_event();
        event.contact_id = Some(contact_id.into());
        event
    }

    fn test_event() -> Self {
        let mut event = Self::new(
            "",
            "Test.metric.value",
            State::Test,
            State::Test,
            chrono::Utc::now().timestamp(),
        );
        event.value = Some(1.0);
        event
    }

    /// Sets the subscription.
    #[must_use]
    pub fn with_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Sets the value.
    #[must_use]
    pub const fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns true if the event belongs to a trigger's history.
    #[must_use]
    pub fn has_trigger(&self) -> bool {
        !self.trigger_id.is_empty()
    }

    /// Serializes the event into its stored record.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EventError::Encode(e.to_string()))
    }

    /// Parses a stored record.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Decode` if the record is malformed.
    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| EventError::Decode {
            reason: e.to_string(),
            payload: payload.to_string(),
        })
    }
}
