//! Core types for the series archive.
//!
//! - [`MetricPoint`]: A single archived value with its timestamp
//! - [`MetricName`]: A validated series name

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};

/// A single archived data point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// The measured value.
    pub value: f64,
}

impl MetricPoint {
    /// Creates a new metric point with the given timestamp and value.
    #[must_use]
    pub const fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Returns the current timestamp in seconds.
    #[must_use]
    pub fn now_timestamp() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A validated series name.
///
/// Series names are dot-separated paths as emitted by Graphite-style
/// collectors (`servers.web-01.cpu.user`). They must:
/// - Be non-empty
/// - Contain no whitespace or control characters
/// - Be at most 256 characters long
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricName(String);

impl MetricName {
    /// Maximum allowed length for a series name.
    pub const MAX_LENGTH: usize = 256;

    /// Creates a new validated series name.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidMetricName` if the name is invalid.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(MetricsError::InvalidMetricName {
                reason: "metric name cannot be empty".to_string(),
            });
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(MetricsError::InvalidMetricName {
                reason: format!(
                    "metric name exceeds maximum length of {} characters",
                    Self::MAX_LENGTH
                ),
            });
        }

        if let Some(c) = name.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(MetricsError::InvalidMetricName {
                reason: format!("invalid character {c:?} in metric name"),
            });
        }

        Ok(Self(name))
    }

    /// Returns the series name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `MetricName` and returns the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for MetricName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod metric_name_tests {
        use super::*;
        use test_case::test_case;
        use proptest::prelude::*;

        #[test_case("servers.web-01.cpu.user" ; "graphite path")]
        #[test_case("load" ; "single segment")]
        #[test_case("app.requests{code=500}" ; "braces")]
        fn accepts_valid_names(name: &str) {
            let parsed = MetricName::new(name);
            assert!(parsed.is_ok());
            assert_eq!(parsed.unwrap().as_str(), name);
        }

        #[test_case("" ; "empty")]
        #[test_case("servers web" ; "space")]
        #[test_case("servers\tweb" ; "tab")]
        #[test_case("servers\nweb" ; "newline")]
        fn rejects_invalid_names(name: &str) {
            assert!(matches!(
                MetricName::new(name),
                Err(MetricsError::InvalidMetricName { .. })
            ));
        }

        #[test]
        fn rejects_overlong_name() {
            let name = "a".repeat(MetricName::MAX_LENGTH + 1);
            assert!(MetricName::new(name).is_err());
        }

        proptest! {
            #[test]
            fn graphite_paths_are_valid(segments in proptest::collection::vec("[a-z0-9_-]{1,12}", 1..8)) {
                let name = segments.join(".");
                let parsed = MetricName::new(name.clone()).unwrap();
                prop_assert_eq!(parsed.as_str(), name.as_str());
            }

            #[test]
            fn names_with_whitespace_are_rejected(head in "[a-z]{1,8}", tail in "[a-z]{1,8}", ws in "[ \t\r\n]") {
                let candidate = format!("{head}{ws}{tail}");
                prop_assert!(MetricName::new(candidate).is_err());
            }
        }

        #[test]
        fn display_matches_inner() {
            let name = MetricName::new("a.b.c").unwrap();
            assert_eq!(name.to_string(), "a.b.c");
            assert_eq!(name.into_inner(), "a.b.c");
        }
    }
}
