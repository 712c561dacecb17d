//! In-memory series archive with retention.
//!
//! This module provides the [`MetricStore`] which keeps the values seen for
//! every series, ordered by timestamp, and expires data older than the
//! configured retention.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::types::{MetricName, MetricPoint};

/// Thread-safe in-memory archive of series values.
///
/// Points are kept in timestamp order. A point whose timestamp is already
/// present replaces the stored value, so callers that push downsampled
/// (retention-aligned) timestamps keep one value per retention slot.
#[derive(Debug)]
pub struct MetricStore {
    /// The retention duration for points (in seconds).
    retention_secs: i64,
    /// The archived points, keyed by series name.
    data: Arc<RwLock<HashMap<MetricName, Vec<MetricPoint>>>>,
}

impl MetricStore {
    /// Creates a new archive with the given retention duration.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention_secs: i64::try_from(retention.as_secs()).unwrap_or(i64::MAX),
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn cutoff(&self) -> i64 {
        MetricPoint::now_timestamp().saturating_sub(self.retention_secs)
    }

    /// Pushes several points under a single lock acquisition.
    ///
    /// # Errors
    ///
    /// Returns an error if any storage operation fails.
    #[allow(clippy::significant_drop_tightening)] // Lock needed for batch atomic operation
    pub fn push_batch(&self, metrics: Vec<(MetricName, MetricPoint)>) -> Result<()> {
        let cutoff = self.cutoff();
        let count = metrics.len();

        let mut data = self.data.write();
        for (name, point) in metrics {
            insert_point(data.entry(name).or_default(), point, cutoff);
        }

        debug!(count, series = data.len(), "archived metric points");
        Ok(())
    }

    /// Returns the most recent point of a series, if any.
    #[must_use]
    pub fn latest(&self, name: &MetricName) -> Option<MetricPoint> {
        let data = self.data.read();
        data.get(name).and_then(|points| points.last().copied())
    }

    /// Removes several series at once, returning how many existed.
    pub fn remove_metrics<'a>(&self, names: impl IntoIterator<Item = &'a MetricName>) -> usize {
        let mut data = self.data.write();
        names
            .into_iter()
            .filter(|name| data.remove(*name).is_some())
            .count()
    }

    /// Expires points older than the retention across all series.
    ///
    /// Pushes only expire the series they touch; a series nobody writes to
    /// anymore is only dropped here. Returns how many series were dropped.
    pub fn expire_old_data(&self) -> usize {
        let cutoff = self.cutoff();

        let mut data = self.data.write();
        let before = data.len();
        for points in data.values_mut() {
            points.retain(|p| p.timestamp >= cutoff);
        }
        data.retain(|_, v| !v.is_empty());
        before - data.len()
    }
}

/// Inserts in timestamp order, replacing a point with the same timestamp.
fn insert_point(points: &mut Vec<MetricPoint>, point: MetricPoint, cutoff: i64) {
    points.retain(|p| p.timestamp >= cutoff);

    match points.binary_search_by_key(&point.timestamp, |p| p.timestamp) {
        Ok(pos) => points[pos] = point,
        Err(pos) => points.insert(pos, point),
    }
}

impl Clone for MetricStore {
    fn clone(&self) -> Self {
        Self {
            retention_secs: self.retention_secs,
            data: Arc::clone(&self.data),
        }
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        // One day of history
        Self::new(Duration::from_secs(86_400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> MetricStore {
        MetricStore::new(Duration::from_secs(3600))
    }

    fn test_metric_name() -> MetricName {
        MetricName::new("servers.web-01.cpu").unwrap()
    }

    fn recent_ts(offset_secs: i64) -> i64 {
        MetricPoint::now_timestamp() - offset_secs
    }

    fn points(store: &MetricStore, name: &MetricName) -> Vec<MetricPoint> {
        store.data.read().get(name).cloned().unwrap_or_default()
    }

    mod store_creation_tests {
        use super::*;

        #[test]
        fn default_store_keeps_one_day() {
            assert_eq!(MetricStore::default().retention_secs, 86_400);
        }

        #[test]
        fn huge_retention_saturates() {
            let store = MetricStore::new(Duration::MAX);
            assert_eq!(store.retention_secs, i64::MAX);

            store
                .push_batch(vec![(test_metric_name(), MetricPoint::new(0, 1.0))])
                .unwrap();
            assert_eq!(store.expire_old_data(), 0);
            assert!(store.latest(&test_metric_name()).is_some());
        }

        #[test]
        fn cloned_store_shares_data() {
            let store1 = test_store();
            let store2 = store1.clone();
            let name = test_metric_name();

            store1
                .push_batch(vec![(name.clone(), MetricPoint::new(recent_ts(20), 1.0))])
                .unwrap();
            assert_eq!(store2.latest(&name).map(|p| p.value), Some(1.0));

            store2
                .push_batch(vec![(name.clone(), MetricPoint::new(recent_ts(10), 2.0))])
                .unwrap();
            assert_eq!(points(&store1, &name).len(), 2);
        }
    }

    mod push_tests {
        use super::*;

        #[test]
        fn push_batch_maintains_timestamp_order() {
            let store = test_store();
            let name = test_metric_name();

            let ts1 = recent_ts(30);
            let ts2 = recent_ts(20);
            let ts3 = recent_ts(10);

            store
                .push_batch(vec![
                    (name.clone(), MetricPoint::new(ts3, 3.0)),
                    (name.clone(), MetricPoint::new(ts1, 1.0)),
                    (name.clone(), MetricPoint::new(ts2, 2.0)),
                ])
                .unwrap();

            let timestamps: Vec<i64> = points(&store, &name).iter().map(|p| p.timestamp).collect();
            assert_eq!(timestamps, vec![ts1, ts2, ts3]);
            assert_eq!(store.latest(&name).map(|p| p.value), Some(3.0));
        }

        #[test]
        fn same_timestamp_replaces_value() {
            let store = test_store();
            let name = test_metric_name();
            let ts = recent_ts(60);

            store
                .push_batch(vec![(name.clone(), MetricPoint::new(ts, 1.0))])
                .unwrap();
            store
                .push_batch(vec![(name.clone(), MetricPoint::new(ts, 5.0))])
                .unwrap();

            assert_eq!(points(&store, &name).len(), 1);
            assert_eq!(store.latest(&name), Some(MetricPoint::new(ts, 5.0)));
        }

        #[test]
        fn push_batch_spans_series() {
            let store = test_store();
            let a = MetricName::new("a").unwrap();
            let b = MetricName::new("b").unwrap();

            store
                .push_batch(vec![
                    (a.clone(), MetricPoint::new(recent_ts(3), 1.0)),
                    (b.clone(), MetricPoint::new(recent_ts(2), 2.0)),
                    (a.clone(), MetricPoint::new(recent_ts(1), 3.0)),
                ])
                .unwrap();

            assert_eq!(points(&store, &a).len(), 2);
            assert_eq!(points(&store, &b).len(), 1);
            assert_eq!(store.latest(&a).map(|p| p.value), Some(3.0));
        }

        #[test]
        fn latest_of_missing_series_is_none() {
            assert!(test_store().latest(&test_metric_name()).is_none());
        }
    }

    mod removal_tests {
        use super::*;

        #[test]
        fn remove_metrics_counts_existing_only() {
            let store = test_store();
            let a = MetricName::new("a").unwrap();
            let b = MetricName::new("b").unwrap();
            let missing = MetricName::new("missing").unwrap();

            store
                .push_batch(vec![
                    (a.clone(), MetricPoint::new(recent_ts(1), 1.0)),
                    (b.clone(), MetricPoint::new(recent_ts(1), 1.0)),
                ])
                .unwrap();

            assert_eq!(store.remove_metrics([&a, &b, &missing]), 2);
            assert!(store.latest(&a).is_none());
            assert!(store.latest(&b).is_none());
            assert_eq!(store.remove_metrics([&a]), 0);
        }
    }

    mod expiry_tests {
        use super::*;

        #[test]
        fn push_drops_points_outside_retention() {
            let store = MetricStore::new(Duration::from_secs(60));
            let name = test_metric_name();

            store
                .push_batch(vec![(name.clone(), MetricPoint::new(recent_ts(600), 1.0))])
                .unwrap();
            store
                .push_batch(vec![(name.clone(), MetricPoint::new(recent_ts(0), 2.0))])
                .unwrap();

            assert_eq!(points(&store, &name).len(), 1);
        }

        #[test]
        fn expire_old_data_drops_idle_series_only() {
            let store = MetricStore::new(Duration::from_secs(60));
            let idle = test_metric_name();
            let live = MetricName::new("servers.web-02.cpu").unwrap();

            // Bypass push-time expiry by writing directly.
            store
                .data
                .write()
                .insert(idle.clone(), vec![MetricPoint::new(recent_ts(600), 1.0)]);
            store.data.write().insert(
                live.clone(),
                vec![
                    MetricPoint::new(recent_ts(600), 1.0),
                    MetricPoint::new(recent_ts(5), 2.0),
                ],
            );

            assert_eq!(store.expire_old_data(), 1);
            assert!(store.latest(&idle).is_none());
            let kept = points(&store, &live);
            assert_eq!(kept.len(), 1);
            assert_eq!(kept[0].value, 2.0);
        }
    }

    mod concurrent_tests {
        use super::*;
        use std::thread;

        #[test]
        fn concurrent_push() {
            let store = test_store();
            let name = MetricName::new("concurrent.metric").unwrap();
            let base_ts = MetricPoint::now_timestamp() - 3000;

            let handles: Vec<_> = (0..10)
                .map(|i| {
                    let store = store.clone();
                    let name = name.clone();
                    thread::spawn(move || {
                        for j in 0..100 {
                            let ts = base_ts + i * 100 + j;
                            store
                                .push_batch(vec![(name.clone(), MetricPoint::new(ts, ts as f64))])
                                .unwrap();
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(points(&store, &name).len(), 1000);
        }
    }
}
