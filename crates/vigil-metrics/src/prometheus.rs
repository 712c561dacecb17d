//! Prometheus self-metrics for the alerting pipeline.
//!
//! Each pipeline stage owns a cheap, cloneable handle to its metric family:
//! - [`FilterMetrics`]: matched metric intake and batch flush latency
//! - [`CheckerMetrics`]: metric events handled and trigger checks performed
//! - [`NotifierMetrics`]: notification events handed to senders
//!
//! # Example
//!
//! ```rust
//! use vigil_metrics::PipelineRegistry;
//! use std::time::Duration;
//!
//! let registry = PipelineRegistry::new();
//! registry.filter_metrics().observe_saving_duration(Duration::from_millis(3));
//! registry.checker_metrics().inc_metric_events();
//!
//! let output = registry.encode();
//! assert!(output.contains("vigil_filter_saving_duration_seconds"));
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Metrics reported by the matched-metric buffer.
#[derive(Clone)]
pub struct FilterMetrics {
    /// Matched metrics received from the matcher.
    matched_metrics_total: Counter,
    /// Batches whose save failed and were dropped.
    save_failures_total: Counter,
    /// Histogram of batch save durations in seconds.
    saving_duration_seconds: Histogram,
}

impl std::fmt::Debug for FilterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterMetrics")
            .field("matched_metrics_total", &self.matched_metrics_total.get())
            .field("save_failures_total", &self.save_failures_total.get())
            .finish_non_exhaustive()
    }
}

impl FilterMetrics {
    fn new(registry: &mut Registry) -> Self {
        let matched_metrics_total = Counter::default();
        registry.register(
            "vigil_filter_matched_metrics",
            "Matched metrics received by the buffer",
            matched_metrics_total.clone(),
        );

        let save_failures_total = Counter::default();
        registry.register(
            "vigil_filter_save_failures",
            "Metric batches dropped because saving failed",
            save_failures_total.clone(),
        );

        // 0.5ms .. ~8s
        let saving_duration_seconds = Histogram::new(exponential_buckets(0.0005, 2.0, 15));
        registry.register(
            "vigil_filter_saving_duration_seconds",
            "Time taken to save a metric batch",
            saving_duration_seconds.clone(),
        );

        Self {
            matched_metrics_total,
            save_failures_total,
            saving_duration_seconds,
        }
    }

    /// Counts one matched metric received.
    pub fn inc_matched_metrics(&self) {
        self.matched_metrics_total.inc();
    }

    /// Returns the number of matched metrics received.
    #[must_use]
    pub fn matched_metrics(&self) -> u64 {
        self.matched_metrics_total.get()
    }

    /// Counts one dropped batch.
    pub fn inc_save_failures(&self) {
        self.save_failures_total.inc();
    }

    /// Returns the number of dropped batches.
    #[must_use]
    pub fn save_failures(&self) -> u64 {
        self.save_failures_total.get()
    }

    /// Records how long a batch save took.
    pub fn observe_saving_duration(&self, duration: Duration) {
        self.saving_duration_seconds.observe(duration.as_secs_f64());
    }
}

/// Metrics reported by the check dispatcher.
#[derive(Clone)]
pub struct CheckerMetrics {
    metric_events_total: Counter,
    metric_event_failures_total: Counter,
    checks_total: Counter,
    check_failures_total: Counter,
}

impl std::fmt::Debug for CheckerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerMetrics")
            .field("metric_events_total", &self.metric_events_total.get())
            .field("checks_total", &self.checks_total.get())
            .finish_non_exhaustive()
    }
}

impl CheckerMetrics {
    fn new(registry: &mut Registry) -> Self {
        let metric_events_total = Counter::default();
        registry.register(
            "vigil_checker_metric_events",
            "Metric events received by the dispatcher",
            metric_events_total.clone(),
        );

        let metric_event_failures_total = Counter::default();
        registry.register(
            "vigil_checker_metric_event_failures",
            "Metric events whose handling failed",
            metric_event_failures_total.clone(),
        );

        let checks_total = Counter::default();
        registry.register(
            "vigil_checker_checks",
            "Trigger checks performed",
            checks_total.clone(),
        );

        let check_failures_total = Counter::default();
        registry.register(
            "vigil_checker_check_failures",
            "Trigger checks that returned an error",
            check_failures_total.clone(),
        );

        Self {
            metric_events_total,
            metric_event_failures_total,
            checks_total,
            check_failures_total,
        }
    }

    /// Counts one received metric event.
    pub fn inc_metric_events(&self) {
        self.metric_events_total.inc();
    }

    /// Returns the number of received metric events.
    #[must_use]
    pub fn metric_events(&self) -> u64 {
        self.metric_events_total.get()
    }

    /// Counts one failed metric event.
    pub fn inc_metric_event_failures(&self) {
        self.metric_event_failures_total.inc();
    }

    /// Returns the number of failed metric events.
    #[must_use]
    pub fn metric_event_failures(&self) -> u64 {
        self.metric_event_failures_total.get()
    }

    /// Counts one performed trigger check.
    pub fn inc_checks(&self) {
        self.checks_total.inc();
    }

    /// Returns the number of performed trigger checks.
    #[must_use]
    pub fn checks(&self) -> u64 {
        self.checks_total.get()
    }

    /// Counts one failed trigger check.
    pub fn inc_check_failures(&self) {
        self.check_failures_total.inc();
    }

    /// Returns the number of failed trigger checks.
    #[must_use]
    pub fn check_failures(&self) -> u64 {
        self.check_failures_total.get()
    }
}

/// Metrics reported by notification senders.
#[derive(Clone)]
pub struct NotifierMetrics {
    events_fetched_total: Counter,
    send_failures_total: Counter,
}

impl std::fmt::Debug for NotifierMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierMetrics")
            .field("events_fetched_total", &self.events_fetched_total.get())
            .finish_non_exhaustive()
    }
}

impl NotifierMetrics {
    fn new(registry: &mut Registry) -> Self {
        let events_fetched_total = Counter::default();
        registry.register(
            "vigil_notifier_events_fetched",
            "Notification events fetched from the queue",
            events_fetched_total.clone(),
        );

        let send_failures_total = Counter::default();
        registry.register(
            "vigil_notifier_send_failures",
            "Notification events a sender failed to deliver",
            send_failures_total.clone(),
        );

        Self {
            events_fetched_total,
            send_failures_total,
        }
    }

    /// Counts one fetched event.
    pub fn inc_events_fetched(&self) {
        self.events_fetched_total.inc();
    }

    /// Returns the number of fetched events.
    #[must_use]
    pub fn events_fetched(&self) -> u64 {
        self.events_fetched_total.get()
    }

    /// Counts one failed delivery.
    pub fn inc_send_failures(&self) {
        self.send_failures_total.inc();
    }

    /// Returns the number of failed deliveries.
    #[must_use]
    pub fn send_failures(&self) -> u64 {
        self.send_failures_total.get()
    }
}

/// Registry holding every pipeline metric.
///
/// Cloning the registry shares the underlying counters.
#[derive(Clone)]
pub struct PipelineRegistry {
    registry: Arc<RwLock<Registry>>,
    filter_metrics: FilterMetrics,
    checker_metrics: CheckerMetrics,
    notifier_metrics: NotifierMetrics,
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("filter_metrics", &self.filter_metrics)
            .field("checker_metrics", &self.checker_metrics)
            .field("notifier_metrics", &self.notifier_metrics)
            .finish_non_exhaustive()
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRegistry {
    /// Creates a registry with every pipeline metric registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let filter_metrics = FilterMetrics::new(&mut registry);
        let checker_metrics = CheckerMetrics::new(&mut registry);
        let notifier_metrics = NotifierMetrics::new(&mut registry);

        Self {
            registry: Arc::new(RwLock::new(registry)),
            filter_metrics,
            checker_metrics,
            notifier_metrics,
        }
    }

    /// Returns the buffer metrics.
    #[must_use]
    pub fn filter_metrics(&self) -> &FilterMetrics {
        &self.filter_metrics
    }

    /// Returns the dispatcher metrics.
    #[must_use]
    pub fn checker_metrics(&self) -> &CheckerMetrics {
        &self.checker_metrics
    }

    /// Returns the sender metrics.
    #[must_use]
    pub fn notifier_metrics(&self) -> &NotifierMetrics {
        &self.notifier_metrics
    }

    /// Encodes all metrics in Prometheus text format.
    #[must_use]
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            tracing::error!("failed to encode prometheus metrics");
            return String::new();
        }
        buffer
    }

    /// Returns the Content-Type header value for Prometheus metrics.
    #[must_use]
    pub const fn content_type() -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod registry_tests {
        use super::*;

        #[test]
        fn new_registry_starts_at_zero() {
            let registry = PipelineRegistry::new();
            assert_eq!(registry.filter_metrics().matched_metrics(), 0);
            assert_eq!(registry.checker_metrics().checks(), 0);
            assert_eq!(registry.notifier_metrics().events_fetched(), 0);
        }

        #[test]
        fn cloned_registry_shares_state() {
            let registry1 = PipelineRegistry::new();
            let registry2 = registry1.clone();

            registry1.checker_metrics().inc_checks();
            registry2.checker_metrics().inc_checks();

            assert_eq!(registry1.checker_metrics().checks(), 2);
        }

        #[test]
        fn encode_includes_all_families() {
            let registry = PipelineRegistry::new();
            registry.filter_metrics().inc_matched_metrics();

            let output = registry.encode();

            assert!(output.contains("vigil_filter_matched_metrics_total 1"));
            assert!(output.contains("vigil_filter_save_failures_total"));
            assert!(output.contains("vigil_filter_saving_duration_seconds"));
            assert!(output.contains("vigil_checker_metric_events_total"));
            assert!(output.contains("vigil_checker_check_failures_total"));
            assert!(output.contains("vigil_notifier_events_fetched_total"));
        }

        #[test]
        fn content_type_is_prometheus_text() {
            let ct = PipelineRegistry::content_type();
            assert!(ct.contains("text/plain"));
            assert!(ct.contains("0.0.4"));
        }
    }

    mod filter_metrics_tests {
        use super::*;

        #[test]
        fn saving_duration_is_observed() {
            let registry = PipelineRegistry::new();
            registry
                .filter_metrics()
                .observe_saving_duration(Duration::from_millis(2));

            let output = registry.encode();
            assert!(output.contains("vigil_filter_saving_duration_seconds_count 1"));
        }

        #[test]
        fn save_failures_count() {
            let registry = PipelineRegistry::new();
            registry.filter_metrics().inc_save_failures();
            assert_eq!(registry.filter_metrics().save_failures(), 1);
        }
    }

    mod checker_metrics_tests {
        use super::*;

        #[test]
        fn counters_are_independent() {
            let registry = PipelineRegistry::new();
            let metrics = registry.checker_metrics();

            metrics.inc_metric_events();
            metrics.inc_metric_events();
            metrics.inc_metric_event_failures();
            metrics.inc_check_failures();

            assert_eq!(metrics.metric_events(), 2);
            assert_eq!(metrics.metric_event_failures(), 1);
            assert_eq!(metrics.checks(), 0);
            assert_eq!(metrics.check_failures(), 1);
        }
    }
}
