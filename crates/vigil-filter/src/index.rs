//! Pattern index: which triggers watch which patterns, which series each
//! pattern has seen, and the archived values of those series.
//!
//! [`PatternIndex`] is the seam the Metric Buffer saves through and the
//! Check Dispatcher resolves triggers through. [`MemoryPatternIndex`] is the
//! in-process implementation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use vigil_metrics::{MetricName, MetricPoint, MetricStore};

use crate::error::Result;
use crate::types::{MetricBatch, MetricEvent};

/// Storage operations used by the filter and the checker.
pub trait PatternIndex: Send + Sync + fmt::Debug {
    /// Archives every point of a batch and announces one [`MetricEvent`]
    /// per matched (pattern, series) pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be archived.
    fn save_metrics(&self, batch: &MetricBatch) -> Result<()>;

    /// Records that a series matched a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    fn add_pattern_metric(&self, pattern: &str, metric: &str) -> Result<()>;

    /// Returns the triggers watching a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    fn pattern_trigger_ids(&self, pattern: &str) -> Result<Vec<String>>;

    /// Forgets a pattern and drops the archive of every series it has seen.
    ///
    /// A pattern that some trigger watches by the time this runs is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    fn remove_pattern_with_metrics(&self, pattern: &str) -> Result<()>;

    /// Returns the series a pattern has seen.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    fn pattern_metrics(&self, pattern: &str) -> Result<Vec<String>>;

    /// Returns the newest archived point of a series.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read.
    fn latest_value(&self, metric: &str) -> Result<Option<MetricPoint>>;
}

#[derive(Debug, Default)]
struct IndexState {
    /// pattern -> trigger ids
    triggers: HashMap<String, BTreeSet<String>>,
    /// pattern -> series names
    metrics: HashMap<String, BTreeSet<String>>,
}

/// In-process pattern index backed by a [`MetricStore`].
///
/// Cloning shares the index, the archive and the event sender.
#[derive(Clone)]
pub struct MemoryPatternIndex {
    state: Arc<RwLock<IndexState>>,
    archive: MetricStore,
    /// `None` once closed.
    events: Arc<Mutex<Option<mpsc::UnboundedSender<MetricEvent>>>>,
}

impl fmt::Debug for MemoryPatternIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryPatternIndex")
            .field("patterns", &state.triggers.len())
            .field("archive", &self.archive)
            .finish_non_exhaustive()
    }
}

impl MemoryPatternIndex {
    /// Creates an index and the receiver its metric events are published on.
    #[must_use]
    pub fn new(archive: MetricStore) -> (Self, mpsc::UnboundedReceiver<MetricEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let index = Self {
            state: Arc::new(RwLock::new(IndexState::default())),
            archive,
            events: Arc::new(Mutex::new(Some(events))),
        };
        (index, rx)
    }

    /// Stops publishing metric events.
    ///
    /// The receiver ends once it has drained what was already published.
    /// Later saves still archive their points.
    pub fn close_events(&self) {
        if self.events.lock().take().is_some() {
            debug!("metric event publishing closed");
        }
    }

    /// Returns the archive.
    #[must_use]
    pub const fn archive(&self) -> &MetricStore {
        &self.archive
    }

    /// Makes a trigger watch the given patterns, replacing its previous ones.
    pub fn register_trigger<I, S>(&self, trigger_id: &str, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.write();
        remove_trigger(&mut state, trigger_id);

        for pattern in patterns {
            state
                .triggers
                .entry(pattern.into())
                .or_default()
                .insert(trigger_id.to_string());
        }
        debug!(trigger_id, "registered trigger patterns");
    }

    /// Stops a trigger from watching any pattern.
    pub fn unregister_trigger(&self, trigger_id: &str) {
        remove_trigger(&mut self.state.write(), trigger_id);
    }

    /// Returns every pattern some trigger watches.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<_> = self.state.read().triggers.keys().cloned().collect();
        patterns.sort();
        patterns
    }
}

fn remove_trigger(state: &mut IndexState, trigger_id: &str) {
    state.triggers.retain(|_, ids| {
        ids.remove(trigger_id);
        !ids.is_empty()
    });
}

impl PatternIndex for MemoryPatternIndex {
    fn save_metrics(&self, batch: &MetricBatch) -> Result<()> {
        let points = batch
            .iter()
            .map(|m| -> Result<(MetricName, MetricPoint)> {
                Ok((
                    MetricName::new(m.name.as_str())?,
                    MetricPoint::new(m.retention_timestamp, m.value),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        self.archive.push_batch(points)?;

        if let Some(events) = self.events.lock().as_ref() {
            for metric in batch.iter() {
                for pattern in &metric.patterns {
                    if events
                        .send(MetricEvent::new(pattern.as_str(), metric.name.as_str()))
                        .is_err()
                    {
                        trace!(metric = %metric.name, "no metric event subscriber");
                    }
                }
            }
        }

        debug!(count = batch.len(), "saved metric batch");
        Ok(())
    }

    fn add_pattern_metric(&self, pattern: &str, metric: &str) -> Result<()> {
        self.state
            .write()
            .metrics
            .entry(pattern.to_string())
            .or_default()
            .insert(metric.to_string());
        Ok(())
    }

    fn pattern_trigger_ids(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .triggers
            .get(pattern)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn remove_pattern_with_metrics(&self, pattern: &str) -> Result<()> {
        let metrics = {
            let mut state = self.state.write();
            if state.triggers.get(pattern).is_some_and(|ids| !ids.is_empty()) {
                debug!(pattern, "pattern gained a trigger, keeping it");
                return Ok(());
            }
            state.metrics.remove(pattern).unwrap_or_default()
        };

        let names: Vec<MetricName> = metrics
            .iter()
            .filter_map(|m| MetricName::new(m.as_str()).ok())
            .collect();
        let removed = self.archive.remove_metrics(&names);

        debug!(pattern, removed, "removed pattern with its metrics");
        Ok(())
    }

    fn pattern_metrics(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .metrics
            .get(pattern)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn latest_value(&self, metric: &str) -> Result<Option<MetricPoint>> {
        Ok(self.archive.latest(&MetricName::new(metric)?))
    }
}
