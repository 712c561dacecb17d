//! Wires the Metric Buffer, Check Dispatcher and notification fetcher into
//! one running pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_checker::{CheckDispatcher, LastActivity, ThresholdEvaluator};
use vigil_events::{EventStore, NotificationQueue, NotificationSender, run_fetch_loop};
use vigil_filter::{MatchedMetric, MemoryPatternIndex, MetricsMatcher, PatternSet, parse_line};
use vigil_metrics::{MetricStore, PipelineRegistry};

use crate::config::ServerConfig;
use crate::error::Result;

/// Line counts from one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Non-empty lines read.
    pub lines: u64,
    /// Lines that failed to parse.
    pub invalid: u64,
    /// Points matching at least one pattern.
    pub matched: u64,
}

/// What the pipeline did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Events handed to the sender.
    pub delivered: u64,
    /// Events still queued.
    pub pending: usize,
    /// Final pipeline counters in Prometheus text format.
    pub metrics: String,
}

/// A running pipeline.
pub struct Pipeline {
    registry: PipelineRegistry,
    index: MemoryPatternIndex,
    patterns: PatternSet,
    queue: NotificationQueue,
    activity: LastActivity,
    ingest: mpsc::Sender<MatchedMetric>,
    matcher: JoinHandle<()>,
    checker: JoinHandle<()>,
    periodic: JoinHandle<()>,
    stop_periodic: CancellationToken,
    fetcher: JoinHandle<u64>,
    liveness: JoinHandle<()>,
    expiry: JoinHandle<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("patterns", &self.patterns.len())
            .field("last_activity", &self.activity.get())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Opens the event store, registers triggers and spawns every stage.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be opened or a trigger or
    /// pattern is invalid.
    pub fn start(config: &ServerConfig, sender: Arc<dyn NotificationSender>) -> Result<Self> {
        let registry = PipelineRegistry::new();
        let store = EventStore::open(&config.store_config())?;
        let queue = NotificationQueue::with_config(Arc::new(store), config.queue_config());

        let archive = MetricStore::new(Duration::from_secs(config.filter.archive_retention_secs));
        let (index, events) = MemoryPatternIndex::new(archive);
        let evaluator = ThresholdEvaluator::new(Arc::new(index.clone()), queue.clone());

        let triggers = config.trigger_definitions();
        for trigger in triggers {
            index.register_trigger(&trigger.id, trigger.patterns.clone());
            info!(trigger = %trigger.id, patterns = ?trigger.patterns, "registered trigger");
            evaluator.upsert_trigger(trigger)?;
        }

        let patterns = PatternSet::new(config.ingest_patterns())?.with_retention(config.filter.retention_secs);

        let dispatcher = Arc::new(CheckDispatcher::new(
            Arc::new(index.clone()),
            Arc::new(evaluator),
            registry.checker_metrics().clone(),
            config.checker_config(),
        ));
        let activity = dispatcher.activity().clone();
        let stop_periodic = CancellationToken::new();
        let periodic = tokio::spawn(Arc::clone(&dispatcher).periodic_checker(stop_periodic.clone()));
        let checker = tokio::spawn(dispatcher.metrics_checker(events));

        let (ingest, rx) = mpsc::channel(config.filter.channel_capacity);
        let matcher = MetricsMatcher::with_config(
            Arc::new(index.clone()),
            registry.filter_metrics().clone(),
            config.matcher_config(),
        )
        .start(rx);

        let cancel = CancellationToken::new();
        let fetcher = tokio::spawn(run_fetch_loop(
            queue.clone(),
            sender,
            registry.notifier_metrics().clone(),
            cancel.clone(),
        ));
        let liveness = tokio::spawn(watch_liveness(
            activity.clone(),
            Duration::from_secs(config.checker.stale_after_secs.max(1)),
            cancel.clone(),
        ));
        let expiry = tokio::spawn(expire_archive(
            index.archive().clone(),
            Duration::from_secs(config.filter.expire_interval_secs.max(1)),
            cancel.clone(),
        ));

        info!(
            patterns = patterns.len(),
            triggers = config.triggers.len(),
            journal = ?config.events.journal_path,
            "pipeline started"
        );

        Ok(Self {
            registry,
            index,
            patterns,
            queue,
            activity,
            ingest,
            matcher,
            checker,
            periodic,
            stop_periodic,
            fetcher,
            liveness,
            expiry,
            cancel,
        })
    }

    /// Returns the queue client.
    #[must_use]
    pub const fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    /// Returns the pipeline counters.
    #[must_use]
    pub const fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Returns the pattern index.
    #[must_use]
    pub const fn index(&self) -> &MemoryPatternIndex {
        &self.index
    }

    /// Returns the last metric event clock.
    #[must_use]
    pub const fn activity(&self) -> &LastActivity {
        &self.activity
    }

    /// Parses one line and queues it for the Metric Buffer if any pattern
    /// matches. Returns whether it matched.
    ///
    /// # Errors
    ///
    /// Returns `FilterError::InvalidLine` for malformed lines and
    /// `FilterError::Unavailable` if the Metric Buffer has stopped.
    pub async fn ingest_line(&self, line: &str) -> Result<bool> {
        let metric = parse_line(line)?;
        let Some(matched) = self.patterns.match_metric(metric) else {
            return Ok(false);
        };

        self.ingest.send(matched).await.map_err(|_| vigil_filter::FilterError::Unavailable {
            reason: "metric buffer stopped".to_string(),
        })?;
        Ok(true)
    }

    /// Reads plain-text lines until EOF or cancellation. Malformed lines are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the Metric Buffer has stopped.
    pub async fn ingest<R>(&self, reader: R, stop: &CancellationToken) -> Result<IngestStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut stats = IngestStats::default();

        loop {
            let line = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            stats.lines += 1;
            match self.ingest_line(line).await {
                Ok(true) => stats.matched += 1,
                Ok(false) => {}
                Err(crate::ServerError::Filter(e @ vigil_filter::FilterError::InvalidLine { .. })) => {
                    stats.invalid += 1;
                    warn!(error = %e, "skipping metric line");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(lines = stats.lines, matched = stats.matched, invalid = stats.invalid, "ingest finished");
        Ok(stats)
    }

    /// Stops the pipeline stage by stage: the Metric Buffer flushes what is
    /// left, the dispatcher finishes its checks and periodic rounds, then the
    /// fetcher drains what is queued within one fetch timeout and stops.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Task` if a stage panicked.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        info!("pipeline shutting down");

        drop(self.ingest);
        self.matcher.await?;
        self.index.close_events();
        self.checker.await?;
        self.stop_periodic.cancel();
        self.periodic.await?;

        let deadline = tokio::time::Instant::now() + self.queue.config().fetch_timeout;
        while self.queue.pending().unwrap_or(0) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.cancel.cancel();
        let delivered = self.fetcher.await?;
        self.liveness.await?;
        self.expiry.await?;

        let pending = self.queue.pending().unwrap_or(0);
        let metrics = self.registry.encode();
        info!(delivered, pending, "pipeline stopped");
        debug!(metrics = %metrics, "final pipeline counters");
        Ok(ShutdownReport {
            delivered,
            pending,
            metrics,
        })
    }
}

async fn expire_archive(archive: MetricStore, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let dropped = archive.expire_old_data();
        if dropped > 0 {
            debug!(dropped, "expired idle archive series");
        }
    }
}

async fn watch_liveness(activity: LastActivity, stale_after: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(stale_after);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if activity.is_stale(stale_after) {
            warn!(
                last_event = activity.get(),
                stale_after_secs = stale_after.as_secs(),
                "no metric events received recently"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use vigil_events::{NotificationEvent, SendFuture, State};
    use vigil_filter::PatternIndex;

    #[derive(Debug, Default)]
    struct CollectingSender {
        events: Mutex<Vec<NotificationEvent>>,
    }

    impl NotificationSender for CollectingSender {
        fn name(&self) -> &str {
            "collecting"
        }

        fn send<'a>(&'a self, event: &'a NotificationEvent) -> SendFuture<'a> {
            Box::pin(async move {
                self.events.lock().push(event.clone());
                Ok(())
            })
        }
    }

    fn config() -> ServerConfig {
        ServerConfig::from_toml(
            r#"
            [patterns]
            "legacy.*" = []

            [[triggers]]
            id = "cpu-high"
            name = "CPU high"
            patterns = ["servers.*.cpu"]
            warn_value = 80.0
            error_value = 90.0
            "#,
        )
        .unwrap()
    }

    fn lines(entries: &[(&str, f64)]) -> String {
        let now = chrono::Utc::now().timestamp();
        entries
            .iter()
            .map(|(name, value)| format!("{name} {value} {now}\n"))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn ingest_counts_lines() {
        let sender = Arc::new(CollectingSender::default());
        let pipeline = Pipeline::start(&config(), sender).unwrap();
        let input = format!(
            "{}garbage\n\n{}",
            lines(&[("servers.web-01.cpu", 10.0)]),
            lines(&[("other.series", 1.0)])
        );

        let stats = pipeline
            .ingest(input.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            stats,
            IngestStats {
                lines: 3,
                invalid: 1,
                matched: 1,
            }
        );
        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn crossing_threshold_reaches_sender() {
        let sender = Arc::new(CollectingSender::default());
        let pipeline = Pipeline::start(&config(), sender.clone()).unwrap();

        let input = lines(&[("servers.web-01.cpu", 85.0)]);
        pipeline
            .ingest(input.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let report = pipeline.shutdown().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pending, 0);
        assert!(report.metrics.contains("vigil_filter_matched_metrics_total 1"));
        assert!(report.metrics.contains("vigil_notifier_events_fetched_total 1"));

        let events = sender.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trigger_id, "cpu-high");
        assert_eq!(events[0].state, State::Warn);
        assert_eq!(events[0].message.as_deref(), Some("CPU high"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_buffered_points() {
        let sender = Arc::new(CollectingSender::default());
        let pipeline = Pipeline::start(&config(), sender.clone()).unwrap();

        let input = lines(&[("servers.web-01.cpu", 99.0)]);
        pipeline
            .ingest(input.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();

        let report = pipeline.shutdown().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(sender.events.lock()[0].state, State::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn unwatched_pattern_is_dropped_from_index() {
        let sender = Arc::new(CollectingSender::default());
        let pipeline = Pipeline::start(&config(), sender.clone()).unwrap();

        let input = lines(&[("legacy.host", 1.0)]);
        pipeline
            .ingest(input.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(pipeline.index().pattern_metrics("legacy.*").unwrap().is_empty());
        assert!(pipeline.activity().get() > 0);
        assert_eq!(pipeline.registry().checker_metrics().metric_events(), 1);

        pipeline.shutdown().await.unwrap();
        assert!(sender.events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_ingest_stops_reading() {
        let pipeline = Pipeline::start(&config(), Arc::new(CollectingSender::default())).unwrap();
        let stop = CancellationToken::new();
        stop.cancel();

        let input = lines(&[("servers.web-01.cpu", 85.0)]);
        let stats = pipeline.ingest(input.as_bytes(), &stop).await.unwrap();

        assert_eq!(stats, IngestStats::default());
        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_series_turns_trigger_nodata() {
        let mut config = config();
        config.filter.archive_retention_secs = 60;
        config.filter.expire_interval_secs = 5;
        config.checker.check_interval_secs = 3;
        let sender = Arc::new(CollectingSender::default());
        let pipeline = Pipeline::start(&config, sender.clone()).unwrap();

        // Older than the archive retention; archived on push, swept later.
        let old = chrono::Utc::now().timestamp() - 600;
        let input = format!("servers.web-01.cpu 95 {old}\n");
        pipeline
            .ingest(input.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(pipeline.index().latest_value("servers.web-01.cpu").unwrap().is_some());

        // Swept at t=5, re-checked by the periodic round at t=6.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(pipeline.index().latest_value("servers.web-01.cpu").unwrap().is_none());

        pipeline.shutdown().await.unwrap();
        let states: Vec<State> = sender.events.lock().iter().map(|e| e.state).collect();
        assert_eq!(states, vec![State::Error, State::NoData]);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_round_delivers_skipped_crossing() {
        let mut config = config();
        config.checker.check_interval_secs = 3;
        let sender = Arc::new(CollectingSender::default());
        let pipeline = Pipeline::start(&config, sender.clone()).unwrap();
        let stop = CancellationToken::new();

        pipeline
            .ingest(lines(&[("servers.web-01.cpu", 10.0)]).as_bytes(), &stop)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        pipeline
            .ingest(lines(&[("servers.web-01.cpu", 95.0)]).as_bytes(), &stop)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;

        let report = pipeline.shutdown().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(sender.events.lock()[0].state, State::Error);
    }
}
