//! Process-wide "last metric event" clock used by liveness checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Unix timestamp of the most recent metric event.
///
/// Cloning shares the clock. A clock that was never touched reads 0.
#[derive(Debug, Clone, Default)]
pub struct LastActivity {
    timestamp: Arc<AtomicI64>,
}

impl LastActivity {
    /// Creates a clock that was never touched.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records activity now.
    pub fn touch(&self) {
        self.touch_at(chrono::Utc::now().timestamp());
    }

    /// Records activity at the given timestamp. The clock never moves back.
    pub fn touch_at(&self, timestamp: i64) {
        self.timestamp.fetch_max(timestamp, Ordering::Relaxed);
    }

    /// Returns the last recorded timestamp.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    /// Returns true if nothing was recorded within `max_age`.
    #[must_use]
    pub fn is_stale(&self, max_age: Duration) -> bool {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        chrono::Utc::now().timestamp().saturating_sub(self.get()) > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_clock_is_stale() {
        let clock = LastActivity::new();
        assert_eq!(clock.get(), 0);
        assert!(clock.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn touch_makes_clock_fresh() {
        let clock = LastActivity::new();
        clock.touch();
        assert!(!clock.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn clock_never_moves_back() {
        let clock = LastActivity::new();
        clock.touch_at(200);
        clock.touch_at(100);
        assert_eq!(clock.get(), 200);
    }

    #[test]
    fn clones_share_the_clock() {
        let clock = LastActivity::new();
        let shared = clock.clone();
        shared.touch_at(42);
        assert_eq!(clock.get(), 42);
    }
}
