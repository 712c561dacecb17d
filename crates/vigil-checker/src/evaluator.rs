//! Trigger evaluation.
//!
//! The dispatcher hands every check to a [`TriggerEvaluator`].
//! [`ThresholdEvaluator`] is the built-in one: it compares the newest
//! archived value of each series a trigger watches against warn and error
//! thresholds and queues a notification when the trigger's state changes.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, trace};
use vigil_events::{NotificationEvent, NotificationQueue, State};
use vigil_filter::PatternIndex;

use crate::error::{CheckerError, Result};

/// Future returned by [`TriggerEvaluator::check`].
pub type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// One evaluation attempt of one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTask {
    /// The trigger to evaluate.
    pub trigger_id: String,
    /// Evaluate even if the trigger was checked within `check_interval`.
    pub skip_cache: bool,
    /// Minimum time between two evaluations.
    pub check_interval: Duration,
}

/// Evaluates triggers.
pub trait TriggerEvaluator: Send + Sync + fmt::Debug {
    /// Runs one evaluation attempt.
    fn check<'a>(&'a self, task: &'a CheckTask) -> CheckFuture<'a>;

    /// Returns every trigger the evaluator knows, for periodic checks.
    fn trigger_ids(&self) -> Vec<String>;
}

/// A threshold trigger.
///
/// Thresholds are rising by default: a value at or above `error_value` is
/// ERROR, at or above `warn_value` is WARN. When both are set and
/// `error_value < warn_value` they are falling, and the comparisons flip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Unique trigger id.
    pub id: String,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Patterns whose series the trigger watches.
    pub patterns: Vec<String>,
    /// Warning threshold.
    #[serde(default)]
    pub warn_value: Option<f64>,
    /// Error threshold.
    #[serde(default)]
    pub error_value: Option<f64>,
}

impl TriggerDefinition {
    /// Checks the definition is usable.
    ///
    /// # Errors
    ///
    /// Returns `CheckerError::InvalidTrigger` for an empty id, no patterns,
    /// no thresholds, or equal warn and error thresholds.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| CheckerError::InvalidTrigger {
            trigger_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if self.patterns.is_empty() {
            return Err(invalid("no patterns"));
        }
        match (self.warn_value, self.error_value) {
            (None, None) => Err(invalid("no thresholds")),
            (Some(warn), Some(error)) if (warn - error).abs() < f64::EPSILON => {
                Err(invalid("warn_value equals error_value"))
            }
            _ => Ok(()),
        }
    }

    /// Returns true for falling thresholds.
    #[must_use]
    pub fn is_falling(&self) -> bool {
        matches!((self.warn_value, self.error_value), (Some(warn), Some(error)) if error < warn)
    }

    /// Returns the state a value puts the trigger in.
    #[must_use]
    pub fn state_for(&self, value: f64) -> State {
        let crossed = |threshold: Option<f64>| {
            threshold.is_some_and(|t| if self.is_falling() { value <= t } else { value >= t })
        };

        if crossed(self.error_value) {
            State::Error
        } else if crossed(self.warn_value) {
            State::Warn
        } else {
            State::Ok
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LastCheck {
    state: State,
    checked_at: Instant,
}

/// Built-in threshold evaluator.
pub struct ThresholdEvaluator {
    index: Arc<dyn PatternIndex>,
    queue: NotificationQueue,
    triggers: RwLock<HashMap<String, TriggerDefinition>>,
    last_checks: Mutex<HashMap<String, LastCheck>>,
}

impl fmt::Debug for ThresholdEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThresholdEvaluator")
            .field("triggers", &self.triggers.read().len())
            .finish_non_exhaustive()
    }
}

impl ThresholdEvaluator {
    /// Creates an evaluator with no triggers.
    #[must_use]
    pub fn new(index: Arc<dyn PatternIndex>, queue: NotificationQueue) -> Self {
        Self {
            index,
            queue,
            triggers: RwLock::new(HashMap::new()),
            last_checks: Mutex::new(HashMap::new()),
        }
    }

    /// Adds or replaces a trigger.
    ///
    /// # Errors
    ///
    /// Returns `CheckerError::InvalidTrigger` if the definition is invalid.
    pub fn upsert_trigger(&self, trigger: TriggerDefinition) -> Result<()> {
        trigger.validate()?;
        debug!(trigger_id = %trigger.id, patterns = ?trigger.patterns, "trigger registered");
        self.triggers.write().insert(trigger.id.clone(), trigger);
        Ok(())
    }

    /// Removes a trigger and forgets its last state.
    pub fn remove_trigger(&self, trigger_id: &str) -> Option<TriggerDefinition> {
        self.last_checks.lock().remove(trigger_id);
        self.triggers.write().remove(trigger_id)
    }

    /// Returns the state of the last evaluation of a trigger.
    #[must_use]
    pub fn last_state(&self, trigger_id: &str) -> Option<State> {
        self.last_checks.lock().get(trigger_id).map(|c| c.state)
    }

    /// Evaluates a trigger, returning the new state.
    ///
    /// Returns `None` if the check was skipped because the trigger was
    /// evaluated within the check interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the trigger is unknown, the index cannot be read
    /// or the notification cannot be queued.
    pub fn evaluate(&self, task: &CheckTask) -> Result<Option<State>> {
        let trigger = self
            .triggers
            .read()
            .get(&task.trigger_id)
            .cloned()
            .ok_or_else(|| CheckerError::UnknownTrigger {
                trigger_id: task.trigger_id.clone(),
            })?;

        let checked_at = Instant::now();
        let previous = self.last_checks.lock().get(&trigger.id).copied();

        if let Some(last) = previous {
            if !task.skip_cache && checked_at.duration_since(last.checked_at) < task.check_interval {
                trace!(trigger_id = %trigger.id, "checked recently, skipping");
                return Ok(None);
            }
        }

        let (state, metric, value) = self.worst_value(&trigger)?;
        let old_state = previous.map_or(State::Ok, |last| last.state);

        if state != old_state {
            let timestamp = chrono::Utc::now().timestamp();
            let mut event = NotificationEvent::new(trigger.id.as_str(), metric, state, old_state, timestamp);
            if let Some(value) = value {
                event = event.with_value(value);
            }
            if !trigger.name.is_empty() {
                event = event.with_message(trigger.name.as_str());
            }
            self.queue.push(&event, true)?;

            info!(
                trigger_id = %trigger.id,
                old_state = %old_state,
                state = %state,
                metric = %event.metric,
                "trigger state changed"
            );
        }

        self.last_checks.lock().insert(
            trigger.id,
            LastCheck { state, checked_at },
        );

        Ok(Some(state))
    }

    /// Worst state across the newest value of every watched series.
    fn worst_value(&self, trigger: &TriggerDefinition) -> Result<(State, String, Option<f64>)> {
        let mut worst: Option<(State, String, f64)> = None;

        for pattern in &trigger.patterns {
            for metric in self.index.pattern_metrics(pattern)? {
                let Some(point) = self.index.latest_value(&metric)? else {
                    continue;
                };
                let state = trigger.state_for(point.value);
                if worst.as_ref().is_none_or(|(w, _, _)| state.score() > w.score()) {
                    worst = Some((state, metric, point.value));
                }
            }
        }

        Ok(match worst {
            Some((state, metric, value)) => (state, metric, Some(value)),
            None => (State::NoData, String::new(), None),
        })
    }
}

impl TriggerEvaluator for ThresholdEvaluator {
    fn check<'a>(&'a self, task: &'a CheckTask) -> CheckFuture<'a> {
        Box::pin(async move { self.evaluate(task).map(|_| ()) })
    }

    fn trigger_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.triggers.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_events::EventStore;
    use vigil_filter::{MatchedMetric, MemoryPatternIndex, MetricBatch};
    use vigil_metrics::{MetricPoint, MetricStore};

    fn trigger(warn: Option<f64>, error: Option<f64>) -> TriggerDefinition {
        TriggerDefinition {
            id: "t1".to_string(),
            name: "cpu".to_string(),
            patterns: vec!["servers.*.cpu".to_string()],
            warn_value: warn,
            error_value: error,
        }
    }

    fn task(skip_cache: bool) -> CheckTask {
        CheckTask {
            trigger_id: "t1".to_string(),
            skip_cache,
            check_interval: Duration::from_secs(60),
        }
    }

    struct Fixture {
        index: MemoryPatternIndex,
        queue: NotificationQueue,
        evaluator: ThresholdEvaluator,
    }

    fn fixture(definition: TriggerDefinition) -> Fixture {
        let (index, _rx) = MemoryPatternIndex::new(MetricStore::default());
        let queue = NotificationQueue::new(Arc::new(EventStore::in_memory()));
        let evaluator = ThresholdEvaluator::new(Arc::new(index.clone()), queue.clone());
        evaluator.upsert_trigger(definition).unwrap();
        Fixture {
            index,
            queue,
            evaluator,
        }
    }

    fn record(index: &MemoryPatternIndex, metric: &str, value: f64) {
        let batch: MetricBatch = [MatchedMetric::new(
            metric,
            vec!["servers.*.cpu".to_string()],
            value,
            MetricPoint::now_timestamp(),
            1,
        )]
        .into_iter()
        .collect();
        index.save_metrics(&batch).unwrap();
        index.add_pattern_metric("servers.*.cpu", metric).unwrap();
    }

    mod definition_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(Some(80.0), Some(90.0), 50.0, State::Ok ; "rising ok")]
        #[test_case(Some(80.0), Some(90.0), 80.0, State::Warn ; "rising warn at threshold")]
        #[test_case(Some(80.0), Some(90.0), 95.0, State::Error ; "rising error")]
        #[test_case(Some(20.0), Some(10.0), 50.0, State::Ok ; "falling ok")]
        #[test_case(Some(20.0), Some(10.0), 15.0, State::Warn ; "falling warn")]
        #[test_case(Some(20.0), Some(10.0), 10.0, State::Error ; "falling error at threshold")]
        #[test_case(None, Some(90.0), 95.0, State::Error ; "error only")]
        #[test_case(Some(80.0), None, 95.0, State::Warn ; "warn only")]
        fn state_for(warn: Option<f64>, error: Option<f64>, value: f64, expected: State) {
            assert_eq!(trigger(warn, error).state_for(value), expected);
        }

        #[test]
        fn validate_rejects_unusable_definitions() {
            assert!(trigger(None, None).validate().is_err());
            assert!(trigger(Some(5.0), Some(5.0)).validate().is_err());

            let mut no_patterns = trigger(Some(1.0), None);
            no_patterns.patterns.clear();
            assert!(no_patterns.validate().is_err());

            let mut no_id = trigger(Some(1.0), None);
            no_id.id = " ".to_string();
            assert!(no_id.validate().is_err());
        }
    }

    mod evaluate_tests {
        use super::*;

        #[test]
        fn state_change_queues_event_for_ui() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));
            record(&f.index, "servers.web-01.cpu", 95.0);

            assert_eq!(f.evaluator.evaluate(&task(true)).unwrap(), Some(State::Error));

            let feed = f.queue.ui_feed(10).unwrap();
            assert_eq!(feed.len(), 1);
            assert_eq!(feed[0].trigger_id, "t1");
            assert_eq!(feed[0].metric, "servers.web-01.cpu");
            assert_eq!(feed[0].state, State::Error);
            assert_eq!(feed[0].old_state, State::Ok);
            assert_eq!(feed[0].value, Some(95.0));
            assert_eq!(f.queue.range_by_trigger("t1", 0, 10).unwrap().len(), 1);
        }

        #[test]
        fn unchanged_state_queues_nothing() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));
            record(&f.index, "servers.web-01.cpu", 10.0);

            assert_eq!(f.evaluator.evaluate(&task(true)).unwrap(), Some(State::Ok));
            assert_eq!(f.queue.pending().unwrap(), 0);
        }

        #[test]
        fn worst_series_wins() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));
            record(&f.index, "servers.web-01.cpu", 85.0);
            record(&f.index, "servers.web-02.cpu", 99.0);
            record(&f.index, "servers.web-03.cpu", 10.0);

            f.evaluator.evaluate(&task(true)).unwrap();

            let event = &f.queue.ui_feed(1).unwrap()[0];
            assert_eq!(event.state, State::Error);
            assert_eq!(event.metric, "servers.web-02.cpu");
        }

        #[test]
        fn no_series_is_nodata() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));

            assert_eq!(f.evaluator.evaluate(&task(true)).unwrap(), Some(State::NoData));
            assert_eq!(f.evaluator.last_state("t1"), Some(State::NoData));
        }

        #[test]
        fn recent_check_is_skipped_unless_cache_is_skipped() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));
            record(&f.index, "servers.web-01.cpu", 10.0);
            f.evaluator.evaluate(&task(false)).unwrap();

            record(&f.index, "servers.web-01.cpu", 95.0);
            assert_eq!(f.evaluator.evaluate(&task(false)).unwrap(), None);
            assert_eq!(f.evaluator.last_state("t1"), Some(State::Ok));

            assert_eq!(f.evaluator.evaluate(&task(true)).unwrap(), Some(State::Error));
        }

        #[tokio::test(start_paused = true)]
        async fn skipped_change_is_picked_up_once_interval_elapses() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));
            record(&f.index, "servers.web-01.cpu", 10.0);
            f.evaluator.evaluate(&task(false)).unwrap();

            record(&f.index, "servers.web-01.cpu", 95.0);
            tokio::time::advance(Duration::from_secs(59)).await;
            assert_eq!(f.evaluator.evaluate(&task(false)).unwrap(), None);

            tokio::time::advance(Duration::from_secs(1)).await;
            assert_eq!(f.evaluator.evaluate(&task(false)).unwrap(), Some(State::Error));
            assert_eq!(f.queue.pending().unwrap(), 1);
        }

        #[test]
        fn trigger_ids_are_sorted() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));
            let mut other = trigger(Some(1.0), None);
            other.id = "a0".to_string();
            f.evaluator.upsert_trigger(other).unwrap();

            assert_eq!(f.evaluator.trigger_ids(), vec!["a0", "t1"]);
        }

        #[test]
        fn unknown_trigger_is_an_error() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));
            let mut other = task(true);
            other.trigger_id = "missing".to_string();

            assert!(matches!(
                f.evaluator.evaluate(&other),
                Err(CheckerError::UnknownTrigger { .. })
            ));
        }

        #[test]
        fn removed_trigger_forgets_state() {
            let f = fixture(trigger(Some(80.0), Some(90.0)));
            f.evaluator.evaluate(&task(true)).unwrap();

            assert!(f.evaluator.remove_trigger("t1").is_some());
            assert_eq!(f.evaluator.last_state("t1"), None);
        }
    }
}
