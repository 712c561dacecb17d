//! Check Dispatcher configuration.

use std::time::Duration;

/// Default minimum time between two evaluations of one trigger.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for [`CheckDispatcher`](crate::CheckDispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerConfig {
    /// Minimum time between two evaluations of one trigger.
    pub check_interval: Duration,
    /// Evaluate on every metric event, ignoring the check interval.
    pub no_cache: bool,
    /// Cap on checks running at once across all triggers; `None` is unbounded.
    pub max_concurrent_checks: Option<usize>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            no_cache: false,
            max_concurrent_checks: None,
        }
    }
}

impl CheckerConfig {
    /// Creates a config with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the check interval.
    #[must_use]
    pub const fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Sets whether the check interval is ignored.
    #[must_use]
    pub const fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Caps the number of concurrent checks.
    #[must_use]
    pub const fn with_max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = Some(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_default_interval_and_no_cap() {
        let config = CheckerConfig::new();
        assert_eq!(config.check_interval, DEFAULT_CHECK_INTERVAL);
        assert!(!config.no_cache);
        assert_eq!(config.max_concurrent_checks, None);
    }

    #[test]
    fn builders_set_fields() {
        let config = CheckerConfig::new()
            .with_check_interval(Duration::from_secs(30))
            .with_no_cache(true)
            .with_max_concurrent_checks(4);

        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert!(config.no_cache);
        assert_eq!(config.max_concurrent_checks, Some(4));
    }
}
