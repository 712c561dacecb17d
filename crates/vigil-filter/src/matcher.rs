//! Metric Buffer.
//!
//! [`MetricsMatcher`] batches matched points and saves them through the
//! [`PatternIndex`] in bulk. A batch is flushed when it reaches the batch
//! size, or when no point has arrived for the flush interval. A failed flush
//! is logged and the batch dropped; the next point for each series brings it
//! back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_metrics::FilterMetrics;

use crate::index::PatternIndex;
use crate::types::{MatchedMetric, MetricBatch};

/// Default number of series that forces a flush.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default idle time that forces a flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for [`MetricsMatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherConfig {
    /// Number of series that forces a flush.
    pub batch_size: usize,
    /// Idle time that forces a flush.
    pub flush_interval: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl MatcherConfig {
    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the flush interval.
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// Batches matched points and saves them in bulk.
#[derive(Debug)]
pub struct MetricsMatcher {
    index: Arc<dyn PatternIndex>,
    metrics: FilterMetrics,
    config: MatcherConfig,
}

impl MetricsMatcher {
    /// Creates a matcher with the default configuration.
    #[must_use]
    pub fn new(index: Arc<dyn PatternIndex>, metrics: FilterMetrics) -> Self {
        Self::with_config(index, metrics, MatcherConfig::default())
    }

    /// Creates a matcher with the given configuration.
    #[must_use]
    pub fn with_config(index: Arc<dyn PatternIndex>, metrics: FilterMetrics, config: MatcherConfig) -> Self {
        Self {
            index,
            metrics,
            config,
        }
    }

    /// Starts the buffering loop in the background.
    ///
    /// The returned handle completes once `input` is closed and the last
    /// batch has been flushed.
    pub fn start(self, input: mpsc::Receiver<MatchedMetric>) -> JoinHandle<()> {
        let handle = tokio::spawn(self.run(input));
        info!("metrics matcher started");
        handle
    }

    async fn run(self, mut input: mpsc::Receiver<MatchedMetric>) {
        let mut batch = MetricBatch::new();

        loop {
            match tokio::time::timeout(self.config.flush_interval, input.recv()).await {
                Ok(Some(metric)) => {
                    self.metrics.inc_matched_metrics();
                    batch.insert(metric);
                    if batch.len() < self.config.batch_size {
                        continue;
                    }
                }
                Ok(None) => {
                    if !batch.is_empty() {
                        self.flush(batch.take());
                    }
                    info!("input closed, metrics matcher stopped");
                    return;
                }
                Err(_elapsed) => {}
            }

            if batch.is_empty() {
                continue;
            }
            self.flush(batch.take());
        }
    }

    fn flush(&self, batch: MetricBatch) {
        let started = Instant::now();

        match self.index.save_metrics(&batch) {
            Ok(()) => debug!(count = batch.len(), "flushed metric batch"),
            Err(e) => {
                self.metrics.inc_save_failures();
                warn!(count = batch.len(), error = %e, "failed to save metric batch, dropping it");
            }
        }

        self.metrics.observe_saving_duration(started.elapsed());
    }
}
