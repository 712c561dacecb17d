//! Notification queue client.
//!
//! [`NotificationQueue`] is the thin wrapper trigger checks use to enqueue
//! evaluated state and senders use to dequeue it. It owns the event encoding
//! and the retention constants; the [`EventBackend`] owns atomicity.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::Result;
use crate::store::{EventBackend, HistoryInsert, PushTransaction};
use crate::types::NotificationEvent;

/// Default per-trigger history retention (30 days).
pub const DEFAULT_HISTORY_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default UI feed length.
pub const DEFAULT_UI_FEED_LEN: usize = 101;

/// Default bounded wait of a single fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for [`NotificationQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long events stay in a trigger's history.
    pub history_retention: Duration,
    /// How many events the UI feed keeps.
    pub ui_feed_len: usize,
    /// How long a fetch waits for an event.
    pub fetch_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            history_retention: DEFAULT_HISTORY_RETENTION,
            ui_feed_len: DEFAULT_UI_FEED_LEN,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl QueueConfig {
    /// Sets the history retention.
    #[must_use]
    pub const fn with_history_retention(mut self, retention: Duration) -> Self {
        self.history_retention = retention;
        self
    }

    /// Sets the UI feed length.
    #[must_use]
    pub const fn with_ui_feed_len(mut self, len: usize) -> Self {
        self.ui_feed_len = len;
        self
    }

    /// Sets the fetch timeout.
    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Client for the durable notification queue.
///
/// Cloning is cheap; clones share the backend.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    backend: Arc<dyn EventBackend>,
    config: QueueConfig,
}

impl NotificationQueue {
    /// Creates a client with the default configuration.
    #[must_use]
    pub fn new(backend: Arc<dyn EventBackend>) -> Self {
        Self::with_config(backend, QueueConfig::default())
    }

    /// Creates a client with the given configuration.
    #[must_use]
    pub fn with_config(backend: Arc<dyn EventBackend>, config: QueueConfig) -> Self {
        Self { backend, config }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Pushes an event to the delivery queue, the trigger's history and,
    /// with `feed_ui`, the UI feed, all in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be encoded or the transaction
    /// cannot be committed. Nothing is stored in either case.
    pub fn push(&self, event: &NotificationEvent, feed_ui: bool) -> Result<()> {
        let payload = event.encode()?;

        let history = event.has_trigger().then(|| HistoryInsert {
            trigger_id: event.trigger_id.clone(),
            timestamp: event.timestamp,
            prune_through: chrono::Utc::now()
                .timestamp()
                .saturating_sub(retention_secs(self.config.history_retention)),
        });

        self.backend.push(PushTransaction {
            payload,
            history,
            ui_feed_len: feed_ui.then_some(self.config.ui_feed_len),
        })?;

        trace!(
            trigger_id = %event.trigger_id,
            state = %event.state,
            feed_ui,
            "pushed notification event"
        );
        Ok(())
    }

    /// Waits up to the fetch timeout for the next event and removes it from
    /// the queue.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Decode` if the stored record is corrupt (the
    /// record is consumed) or a backend error if the store cannot be read.
    pub async fn fetch(&self) -> Result<Option<NotificationEvent>> {
        match self.backend.pop_wait(self.config.fetch_timeout).await? {
            Some(payload) => NotificationEvent::decode(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Returns up to `size` events of a trigger's history starting at
    /// offset `start`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a record is corrupt.
    pub fn range_by_trigger(
        &self,
        trigger_id: &str,
        start: usize,
        size: usize,
    ) -> Result<Vec<NotificationEvent>> {
        self.backend
            .range(trigger_id, start, size)?
            .iter()
            .map(|payload| NotificationEvent::decode(payload))
            .collect()
    }

    /// Counts a trigger's history events at or after `from`.
    ///
    /// Lookup failures count as zero.
    #[must_use]
    pub fn count_since(&self, trigger_id: &str, from: i64) -> u64 {
        match self.backend.count_from(trigger_id, from) {
            Ok(count) => count,
            Err(e) => {
                debug!(trigger_id = %trigger_id, error = %e, "event count lookup failed");
                0
            }
        }
    }

    /// Returns up to `limit` events of the UI feed, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a record is corrupt.
    pub fn ui_feed(&self, limit: usize) -> Result<Vec<NotificationEvent>> {
        self.backend
            .ui_feed(limit)?
            .iter()
            .map(|payload| NotificationEvent::decode(payload))
            .collect()
    }

    /// Queues a test notification for a subscription.
    ///
    /// # Errors
    ///
    /// Returns the push error.
    pub fn send_test_notification(&self, subscription_id: &str) -> Result<()> {
        self.push(&NotificationEvent::test_for_subscription(subscription_id), false)
    }

    /// Queues a test notification for a contact.
    ///
    /// # Errors
    ///
    /// Returns the push error.
    pub fn send_test_contact_notification(&self, contact_id: &str) -> Result<()> {
        self.push(&NotificationEvent::test_for_contact(contact_id), false)
    }

    /// Returns how many events wait for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn pending(&self) -> Result<usize> {
        self.backend.queue_len()
    }
}

fn retention_secs(retention: Duration) -> i64 {
    i64::try_from(retention.as_secs()).unwrap_or(i64::MAX)
}
