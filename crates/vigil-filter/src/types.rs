//! Data types flowing through the filter.
//!
//! - [`MatchedMetric`]: one point after pattern matching
//! - [`MetricBatch`]: the latest matched point per series in a flush window
//! - [`MetricEvent`]: "this series of this pattern was updated"

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default sampling resolution in seconds.
pub const DEFAULT_RETENTION: i64 = 60;

/// One observed point after pattern matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedMetric {
    /// The series name.
    pub name: String,
    /// Every pattern the name matched.
    pub patterns: Vec<String>,
    /// The observed value.
    pub value: f64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Sampling resolution in seconds.
    pub retention: i64,
    /// `timestamp` aligned down to the resolution.
    pub retention_timestamp: i64,
}

impl MatchedMetric {
    /// Creates a matched metric, deriving the retention timestamp.
    ///
    /// A non-positive retention is treated as one second. A timestamp with
    /// no aligned slot in range keeps itself as the retention timestamp.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        patterns: Vec<String>,
        value: f64,
        timestamp: i64,
        retention: i64,
    ) -> Self {
        let retention = retention.max(1);
        Self {
            name: name.into(),
            patterns,
            value,
            timestamp,
            retention,
            retention_timestamp: timestamp
                .checked_sub(timestamp.rem_euclid(retention))
                .unwrap_or(timestamp),
        }
    }
}

/// Latest matched point per series within one flush window.
///
/// A later point for a series overwrites the one already in the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricBatch {
    metrics: HashMap<String, MatchedMetric>,
}

impl MetricBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a point into the batch, returning the one it replaced.
    pub fn insert(&mut self, metric: MatchedMetric) -> Option<MatchedMetric> {
        self.metrics.insert(metric.name.clone(), metric)
    }

    /// Returns the batched point of a series.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MatchedMetric> {
        self.metrics.get(name)
    }

    /// Returns the number of series in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns true if the batch holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Iterates over the batched points in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &MatchedMetric> {
        self.metrics.values()
    }

    /// Takes the contents, leaving an empty batch behind.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

impl FromIterator<MatchedMetric> for MetricBatch {
    fn from_iter<I: IntoIterator<Item = MatchedMetric>>(iter: I) -> Self {
        let mut batch = Self::new();
        for metric in iter {
            batch.insert(metric);
        }
        batch
    }
}

/// Notification that a series matching a pattern received a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricEvent {
    /// The pattern the series matched.
    pub pattern: String,
    /// The series name.
    pub metric: String,
}

impl MetricEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(pattern: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            metric: metric.into(),
        }
    }
}
