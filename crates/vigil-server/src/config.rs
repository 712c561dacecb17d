//! Server configuration.
//!
//! The server reads one TOML file with these sections, all optional:
//! - `[filter]`: ingest batching and archive retention
//! - `[checker]`: check interval, cache bypass, concurrency cap, liveness
//! - `[events]`: journal, history retention, UI feed length, fetch timeout
//! - `[logging]`: level and output format
//! - `[patterns]`: extra pattern to trigger id bindings
//! - `[[triggers]]`: threshold trigger definitions

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_checker::{CheckerConfig, TriggerDefinition};
use vigil_events::{EventStoreConfig, QueueConfig};
use vigil_filter::{MatcherConfig, Pattern};

use crate::error::{Result, ServerError};

/// Upper bound for every interval and retention setting, in seconds.
pub const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Ingest batching and archive settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilterSection {
    /// Series per batch that forces a flush.
    pub batch_size: usize,
    /// Idle milliseconds that force a flush.
    pub flush_interval_ms: u64,
    /// Sampling resolution of archived points, in seconds.
    pub retention_secs: i64,
    /// How long archived points are kept, in seconds.
    pub archive_retention_secs: u64,
    /// Seconds between sweeps that drop expired archive points.
    pub expire_interval_secs: u64,
    /// Capacity of the ingest channel.
    pub channel_capacity: usize,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval_ms: 1_000,
            retention_secs: 60,
            archive_retention_secs: 86_400,
            expire_interval_secs: 60,
            channel_capacity: 10_000,
        }
    }
}

/// Check dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckerSection {
    /// Minimum seconds between two evaluations of one trigger.
    pub check_interval_secs: u64,
    /// Evaluate on every metric event.
    pub no_cache: bool,
    /// Cap on concurrent checks; unbounded when absent.
    pub max_concurrent_checks: Option<usize>,
    /// Seconds without metric events after which the server warns.
    pub stale_after_secs: u64,
}

impl Default for CheckerSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            no_cache: false,
            max_concurrent_checks: None,
            stale_after_secs: 300,
        }
    }
}

/// Notification event store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsSection {
    /// Journal file; in-memory only when absent.
    pub journal_path: Option<PathBuf>,
    /// Fsync after every journal append.
    pub fsync: bool,
    /// Journal records that trigger compaction.
    pub compact_after: usize,
    /// Days events stay in a trigger's history.
    pub history_retention_days: u64,
    /// Events kept in the UI feed.
    pub ui_feed_len: usize,
    /// Milliseconds a fetch waits for an event.
    pub fetch_timeout_ms: u64,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            journal_path: None,
            fsync: true,
            compact_after: 10_000,
            history_retention_days: 30,
            ui_feed_len: 101,
            fetch_timeout_ms: 1_000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human readable output.
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Full server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Ingest batching.
    pub filter: FilterSection,
    /// Check dispatch.
    pub checker: CheckerSection,
    /// Event store.
    pub events: EventsSection,
    /// Logging.
    pub logging: LoggingSection,
    /// Pattern to trigger ids, added to the triggers' own patterns. A
    /// pattern with no ids is ingested but watched by nobody.
    pub patterns: BTreeMap<String, Vec<String>>,
    /// Trigger definitions.
    pub triggers: Vec<TriggerDefinition>,
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;

        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ServerError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Config(format!("failed to serialize config: {e}")))
    }

    /// Writes the configuration to a file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` for zero sizes or intervals, intervals
    /// above [`MAX_INTERVAL_SECS`], invalid patterns, duplicate or invalid
    /// triggers, or pattern bindings to unknown triggers.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ServerError::Config(msg.to_string()));

        let bounded = [
            ("filter.archive_retention_secs", self.filter.archive_retention_secs),
            ("filter.expire_interval_secs", self.filter.expire_interval_secs),
            ("checker.check_interval_secs", self.checker.check_interval_secs),
            ("checker.stale_after_secs", self.checker.stale_after_secs),
            (
                "events.history_retention_days",
                self.events.history_retention_days.saturating_mul(SECS_PER_DAY),
            ),
        ];
        if let Some((name, _)) = bounded.iter().find(|(_, secs)| *secs > MAX_INTERVAL_SECS) {
            return Err(ServerError::Config(format!("{name} is too large")));
        }

        if self.filter.batch_size == 0 {
            return invalid("filter.batch_size must be positive");
        }
        if self.filter.flush_interval_ms == 0 {
            return invalid("filter.flush_interval_ms must be positive");
        }
        if self.filter.retention_secs <= 0 {
            return invalid("filter.retention_secs must be positive");
        }
        if self.filter.archive_retention_secs == 0 {
            return invalid("filter.archive_retention_secs must be positive");
        }
        if self.filter.expire_interval_secs == 0 {
            return invalid("filter.expire_interval_secs must be positive");
        }
        if self.filter.channel_capacity == 0 {
            return invalid("filter.channel_capacity must be positive");
        }
        if self.checker.max_concurrent_checks == Some(0) {
            return invalid("checker.max_concurrent_checks must be positive");
        }
        if self.events.ui_feed_len == 0 {
            return invalid("events.ui_feed_len must be positive");
        }
        if self.events.history_retention_days == 0 {
            return invalid("events.history_retention_days must be positive");
        }
        if self.events.fetch_timeout_ms == 0 {
            return invalid("events.fetch_timeout_ms must be positive");
        }
        if self.events.compact_after == 0 {
            return invalid("events.compact_after must be positive");
        }

        let mut ids = std::collections::HashSet::new();
        for trigger in &self.triggers {
            trigger
                .validate()
                .map_err(|e| ServerError::Config(e.to_string()))?;
            if !ids.insert(trigger.id.as_str()) {
                return Err(ServerError::Config(format!("duplicate trigger id '{}'", trigger.id)));
            }
        }

        for (pattern, trigger_ids) in &self.patterns {
            if let Some(unknown) = trigger_ids.iter().find(|id| !ids.contains(id.as_str())) {
                return Err(ServerError::Config(format!(
                    "pattern '{pattern}' is bound to unknown trigger '{unknown}'"
                )));
            }
        }

        for pattern in self.ingest_patterns() {
            Pattern::parse(pattern.as_str()).map_err(|e| ServerError::Config(e.to_string()))?;
        }

        Ok(())
    }

    /// Returns every pattern ingest matches against, deduplicated.
    #[must_use]
    pub fn ingest_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .triggers
            .iter()
            .flat_map(|t| t.patterns.iter().cloned())
            .chain(self.patterns.keys().cloned())
            .collect();
        patterns.sort();
        patterns.dedup();
        patterns
    }

    /// Returns the trigger definitions with the `[patterns]` bindings
    /// merged into their pattern lists.
    #[must_use]
    pub fn trigger_definitions(&self) -> Vec<TriggerDefinition> {
        self.triggers
            .iter()
            .map(|trigger| {
                let mut trigger = trigger.clone();
                for (pattern, ids) in &self.patterns {
                    if ids.contains(&trigger.id) && !trigger.patterns.contains(pattern) {
                        trigger.patterns.push(pattern.clone());
                    }
                }
                trigger
            })
            .collect()
    }

    /// Returns the Metric Buffer configuration.
    #[must_use]
    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig::default()
            .with_batch_size(self.filter.batch_size)
            .with_flush_interval(Duration::from_millis(self.filter.flush_interval_ms))
    }

    /// Returns the Check Dispatcher configuration.
    #[must_use]
    pub fn checker_config(&self) -> CheckerConfig {
        let config = CheckerConfig::new()
            .with_check_interval(Duration::from_secs(self.checker.check_interval_secs))
            .with_no_cache(self.checker.no_cache);

        match self.checker.max_concurrent_checks {
            Some(max) => config.with_max_concurrent_checks(max),
            None => config,
        }
    }

    /// Returns the queue client configuration.
    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::default()
            .with_history_retention(Duration::from_secs(
                self.events.history_retention_days.saturating_mul(SECS_PER_DAY),
            ))
            .with_ui_feed_len(self.events.ui_feed_len)
            .with_fetch_timeout(Duration::from_millis(self.events.fetch_timeout_ms))
    }

    /// Returns the event store configuration.
    #[must_use]
    pub fn store_config(&self) -> EventStoreConfig {
        EventStoreConfig {
            journal_path: self.events.journal_path.clone(),
            sync: self.events.fsync,
            compact_after: self.events.compact_after,
        }
    }

    /// Returns a sample configuration with one trigger.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            events: EventsSection {
                journal_path: Some(PathBuf::from("/var/lib/vigil/events.journal")),
                ..EventsSection::default()
            },
            patterns: BTreeMap::from([("servers.*.loadavg".to_string(), Vec::new())]),
            triggers: vec![TriggerDefinition {
                id: "cpu-high".to_string(),
                name: "CPU usage high".to_string(),
                patterns: vec!["servers.*.cpu.user".to_string()],
                warn_value: Some(80.0),
                error_value: Some(95.0),
            }],
            ..Self::default()
        }
    }
}
