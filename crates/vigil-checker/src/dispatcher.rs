//! Check Dispatcher.
//!
//! [`CheckDispatcher`] turns "a series of a pattern was updated" into
//! evaluations of the triggers watching that pattern. Every metric event is
//! handled on its own task; every check of an event runs on its own task and
//! the event completes only when all of its checks have. A periodic loop
//! re-checks every known trigger once per check interval, so a change the
//! interval cache skipped is not lost when its series goes quiet.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use vigil_filter::{MetricEvent, PatternIndex};
use vigil_metrics::CheckerMetrics;

use crate::activity::LastActivity;
use crate::config::CheckerConfig;
use crate::error::Result;
use crate::evaluator::{CheckTask, TriggerEvaluator};
use crate::locks::TriggerLocks;

/// Dispatches trigger checks for metric events.
#[derive(Debug)]
pub struct CheckDispatcher {
    index: Arc<dyn PatternIndex>,
    evaluator: Arc<dyn TriggerEvaluator>,
    locks: Arc<TriggerLocks>,
    limiter: Option<Arc<Semaphore>>,
    activity: LastActivity,
    metrics: CheckerMetrics,
    config: CheckerConfig,
}

impl CheckDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        index: Arc<dyn PatternIndex>,
        evaluator: Arc<dyn TriggerEvaluator>,
        metrics: CheckerMetrics,
        config: CheckerConfig,
    ) -> Self {
        let limiter = config
            .max_concurrent_checks
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        Self {
            index,
            evaluator,
            locks: Arc::new(TriggerLocks::new()),
            limiter,
            activity: LastActivity::new(),
            metrics,
            config,
        }
    }

    /// Returns the clock of the last handled metric event.
    #[must_use]
    pub const fn activity(&self) -> &LastActivity {
        &self.activity
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Consumes metric events until `input` closes, handling each on its
    /// own task.
    ///
    /// A failing event is logged and does not affect the others. Returns
    /// once `input` is closed and every in-flight event has completed.
    pub async fn metrics_checker(self: Arc<Self>, mut input: mpsc::UnboundedReceiver<MetricEvent>) {
        info!("checking for new metric events started");
        let mut handlers = JoinSet::new();

        while let Some(event) = input.recv().await {
            let dispatcher = Arc::clone(&self);
            handlers.spawn(async move {
                if let Err(e) = dispatcher.handle_metric_event(&event).await {
                    dispatcher.metrics.inc_metric_event_failures();
                    error!(
                        pattern = %event.pattern,
                        metric = %event.metric,
                        error = %e,
                        "failed to handle metric event"
                    );
                }
            });

            while let Some(result) = handlers.try_join_next() {
                log_panic(result, "metric event handler");
            }
        }

        while let Some(result) = handlers.join_next().await {
            log_panic(result, "metric event handler");
        }
        info!("checking for new metric events stopped");
    }

    /// Re-checks every trigger the evaluator knows once per check interval
    /// until `cancel` fires.
    ///
    /// The first round runs one interval after start. A round that overruns
    /// delays the next one instead of bursting.
    pub async fn periodic_checker(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.check_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?period, "periodic trigger checks started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let trigger_ids = self.evaluator.trigger_ids();
            if trigger_ids.is_empty() {
                continue;
            }
            let total = trigger_ids.len();
            let failed = self
                .perform(trigger_ids, self.config.no_cache, self.config.check_interval)
                .await;
            debug!(total, failed, "periodic check round done");
        }
        info!("periodic trigger checks stopped");
    }

    /// Handles one metric event.
    ///
    /// Records activity, records the series under its pattern, resolves the
    /// pattern's triggers and checks each of them, waiting for every check.
    /// A pattern no trigger watches is removed together with its series.
    ///
    /// # Errors
    ///
    /// Returns an error if an index step fails; later steps are skipped.
    pub async fn handle_metric_event(&self, event: &MetricEvent) -> Result<()> {
        self.activity.touch();
        self.metrics.inc_metric_events();

        self.index.add_pattern_metric(&event.pattern, &event.metric)?;
        let trigger_ids = self.index.pattern_trigger_ids(&event.pattern)?;

        if trigger_ids.is_empty() {
            self.index.remove_pattern_with_metrics(&event.pattern)?;
            debug!(pattern = %event.pattern, "pattern has no triggers, removed");
            return Ok(());
        }

        trace!(
            pattern = %event.pattern,
            metric = %event.metric,
            triggers = trigger_ids.len(),
            "checking triggers"
        );
        self.perform(trigger_ids, self.config.no_cache, self.config.check_interval)
            .await;
        Ok(())
    }

    /// Checks every trigger concurrently and waits for all of them.
    ///
    /// Checks of the same trigger are serialized. Returns the number of
    /// failed checks; failures are logged and counted, not propagated.
    pub async fn perform(&self, trigger_ids: Vec<String>, skip_cache: bool, check_interval: Duration) -> usize {
        let mut checks = JoinSet::new();

        for trigger_id in trigger_ids {
            let task = CheckTask {
                trigger_id,
                skip_cache,
                check_interval,
            };
            checks.spawn(run_check(
                task,
                Arc::clone(&self.evaluator),
                Arc::clone(&self.locks),
                self.limiter.clone(),
                self.metrics.clone(),
            ));
        }

        let mut failed = 0;
        while let Some(result) = checks.join_next().await {
            match result {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(e) => {
                    failed += 1;
                    self.metrics.inc_check_failures();
                    log_panic(Err(e), "trigger check");
                }
            }
        }
        failed
    }
}

/// Runs one check under the trigger's lock and, if configured, a global
/// permit. Returns whether it succeeded.
async fn run_check(
    task: CheckTask,
    evaluator: Arc<dyn TriggerEvaluator>,
    locks: Arc<TriggerLocks>,
    limiter: Option<Arc<Semaphore>>,
    metrics: CheckerMetrics,
) -> bool {
    let _guard = locks.acquire(&task.trigger_id).await;

    let _permit = match limiter {
        Some(limiter) => match limiter.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!(trigger_id = %task.trigger_id, "check limiter closed");
                return false;
            }
        },
        None => None,
    };

    metrics.inc_checks();
    match evaluator.check(&task).await {
        Ok(()) => true,
        Err(e) => {
            metrics.inc_check_failures();
            warn!(trigger_id = %task.trigger_id, error = %e, "trigger check failed");
            false
        }
    }
}

fn log_panic(result: std::result::Result<(), JoinError>, what: &str) {
    if let Err(e) = result {
        error!(error = %e, "{what} panicked");
    }
}
