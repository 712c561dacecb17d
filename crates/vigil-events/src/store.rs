//! Durable event store.
//!
//! This module provides the [`EventBackend`] trait, the storage seam the
//! queue client talks to, and [`EventStore`], the in-process backend with an
//! optional journal for crash durability.
//!
//! The store keeps three structures that share one record format:
//! - the delivery queue: pushed at the front, popped from the back
//! - the per-trigger history: ordered by event timestamp, ties by insertion
//! - the UI feed: pushed at the front, truncated to a fixed length

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::Result;
use crate::journal::{HistoryEntry, Journal, JournalRecord, Snapshot};

/// Future returned by [`EventBackend::pop_wait`].
pub type PopFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

/// One push applied as a single all-or-nothing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTransaction {
    /// The encoded event.
    pub payload: String,
    /// Insert into a trigger's history, then prune it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryInsert>,
    /// Also push to the UI feed and truncate it to this many entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_feed_len: Option<usize>,
}

/// History part of a [`PushTransaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryInsert {
    /// The trigger whose history receives the event.
    pub trigger_id: String,
    /// The event timestamp the entry is ordered by.
    pub timestamp: i64,
    /// Entries with a timestamp at or before this are pruned.
    pub prune_through: i64,
}

/// Storage backend for notification events.
///
/// Implementations must apply [`EventBackend::push`] atomically: either every
/// step of the transaction becomes visible or none does, and concurrent
/// pushes never interleave.
pub trait EventBackend: Send + Sync + std::fmt::Debug {
    /// Applies a push transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be committed; nothing is
    /// applied in that case.
    fn push(&self, tx: PushTransaction) -> Result<()>;

    /// Pops the oldest queued record, waiting up to `timeout` for one.
    ///
    /// Resolves to `Ok(None)` if nothing arrived in time.
    fn pop_wait(&self, timeout: Duration) -> PopFuture<'_>;

    /// Returns up to `size` history records of a trigger, newest first,
    /// skipping the `start` newest.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn range(&self, trigger_id: &str, start: usize, size: usize) -> Result<Vec<String>>;

    /// Counts history records of a trigger with a timestamp at or after `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn count_from(&self, trigger_id: &str, from: i64) -> Result<u64>;

    /// Returns up to `limit` UI feed records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn ui_feed(&self, limit: usize) -> Result<Vec<String>>;

    /// Returns the number of records waiting in the delivery queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn queue_len(&self) -> Result<usize>;
}

/// Configuration for [`EventStore`].
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Journal file; `None` keeps the store in memory only.
    pub journal_path: Option<PathBuf>,
    /// Whether every journal append is followed by `fsync`.
    pub sync: bool,
    /// Journal record count that triggers compaction into a snapshot.
    pub compact_after: usize,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            sync: true,
            compact_after: 10_000,
        }
    }
}

impl EventStoreConfig {
    /// Creates a config that journals to the given file.
    #[must_use]
    pub fn journaled(path: impl Into<PathBuf>) -> Self {
        Self {
            journal_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Sets whether appends are fsynced.
    #[must_use]
    pub const fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the compaction threshold.
    #[must_use]
    pub const fn with_compact_after(mut self, records: usize) -> Self {
        self.compact_after = records;
        self
    }
}

/// Store contents.
#[derive(Debug, Default)]
struct Lists {
    /// Front is the newest record.
    queue: VecDeque<String>,
    /// Front is the newest record.
    ui_feed: VecDeque<String>,
    /// Keyed by (timestamp, insertion sequence).
    history: HashMap<String, BTreeMap<(i64, u64), String>>,
    next_seq: u64,
}

impl Lists {
    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Push(tx) => self.apply_push(tx),
            JournalRecord::Pop => {
                self.queue.pop_back();
            }
            JournalRecord::Snapshot(snapshot) => self.restore(snapshot),
        }
    }

    fn apply_push(&mut self, tx: PushTransaction) {
        self.queue.push_front(tx.payload.clone());

        if let Some(insert) = tx.history {
            let seq = self.next_seq;
            self.next_seq += 1;

            let entries = self.history.entry(insert.trigger_id.clone()).or_default();
            entries.insert((insert.timestamp, seq), tx.payload.clone());
            match insert.prune_through.checked_add(1) {
                Some(keep_from) => *entries = entries.split_off(&(keep_from, 0)),
                None => entries.clear(),
            }

            if entries.is_empty() {
                self.history.remove(&insert.trigger_id);
            }
        }

        if let Some(len) = tx.ui_feed_len {
            self.ui_feed.push_front(tx.payload);
            self.ui_feed.truncate(len);
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            queue: self.queue.iter().cloned().collect(),
            ui_feed: self.ui_feed.iter().cloned().collect(),
            history: self
                .history
                .iter()
                .map(|(trigger_id, entries)| {
                    let entries = entries
                        .iter()
                        .map(|((timestamp, _), payload)| HistoryEntry {
                            timestamp: *timestamp,
                            payload: payload.clone(),
                        })
                        .collect();
                    (trigger_id.clone(), entries)
                })
                .collect(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.queue = snapshot.queue.into();
        self.ui_feed = snapshot.ui_feed.into();
        self.history.clear();

        for (trigger_id, entries) in snapshot.history {
            let mut tree = BTreeMap::new();
            for entry in entries {
                tree.insert((entry.timestamp, self.next_seq), entry.payload);
                self.next_seq += 1;
            }
            self.history.insert(trigger_id, tree);
        }
    }
}

#[derive(Debug)]
struct Inner {
    lists: Lists,
    journal: Option<Journal>,
}

impl Inner {
    /// Journals then applies a record; nothing changes if journaling fails.
    fn commit(&mut self, record: JournalRecord, compact_after: usize) -> Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&record)?;
        }
        self.lists.apply(record);

        if let Some(journal) = self.journal.as_mut() {
            if journal.records() > compact_after {
                if let Err(e) = journal.rewrite(self.lists.snapshot()) {
                    warn!(path = %journal.path().display(), error = %e, "journal compaction failed");
                }
            }
        }

        Ok(())
    }
}

/// In-process event store with an optional crash-durable journal.
///
/// All mutation happens under one lock, so the steps of a push are never
/// observed half-applied and never interleave with another push.
#[derive(Debug)]
pub struct EventStore {
    inner: Mutex<Inner>,
    pushed: Notify,
    compact_after: usize,
}

impl EventStore {
    /// Creates a store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                lists: Lists::default(),
                journal: None,
            }),
            pushed: Notify::new(),
            compact_after: EventStoreConfig::default().compact_after,
        }
    }

    /// Opens a store, replaying its journal if one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be opened.
    pub fn open(config: &EventStoreConfig) -> Result<Self> {
        let mut lists = Lists::default();

        let journal = match &config.journal_path {
            Some(path) => {
                let (journal, records) = Journal::open(path, config.sync)?;
                let replayed = records.len();
                for record in records {
                    lists.apply(record);
                }
                debug!(
                    path = %path.display(),
                    replayed,
                    queued = lists.queue.len(),
                    "restored event store from journal"
                );
                Some(journal)
            }
            None => None,
        };

        Ok(Self {
            inner: Mutex::new(Inner { lists, journal }),
            pushed: Notify::new(),
            compact_after: config.compact_after,
        })
    }

    /// Pops the oldest queued record without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the pop cannot be journaled; the record stays
    /// queued in that case.
    pub fn try_pop(&self) -> Result<Option<String>> {
        let mut inner = self.inner.lock();

        let Some(payload) = inner.lists.queue.back().cloned() else {
            return Ok(None);
        };
        inner.commit(JournalRecord::Pop, self.compact_after)?;

        Ok(Some(payload))
    }
}

impl EventBackend for EventStore {
    fn push(&self, tx: PushTransaction) -> Result<()> {
        self.inner
            .lock()
            .commit(JournalRecord::Push(tx), self.compact_after)?;
        self.pushed.notify_waiters();
        Ok(())
    }

    fn pop_wait(&self, timeout: Duration) -> PopFuture<'_> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;

            loop {
                // Register interest before checking, so a push between the
                // check and the wait is not missed.
                let notified = self.pushed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(payload) = self.try_pop()? {
                    return Ok(Some(payload));
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(None);
                }
            }
        })
    }

    fn range(&self, trigger_id: &str, start: usize, size: usize) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .lists
            .history
            .get(trigger_id)
            .map(|entries| {
                entries
                    .values()
                    .rev()
                    .skip(start)
                    .take(size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn count_from(&self, trigger_id: &str, from: i64) -> Result<u64> {
        let inner = self.inner.lock();
        Ok(inner
            .lists
            .history
            .get(trigger_id)
            .map_or(0, |entries| entries.range((from, 0)..).count() as u64))
    }

    fn ui_feed(&self, limit: usize) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner.lists.ui_feed.iter().take(limit).cloned().collect())
    }

    fn queue_len(&self) -> Result<usize> {
        Ok(self.inner.lock().lists.queue.len())
    }
}
