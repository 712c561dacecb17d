//! Append-only journal backing the durable event store.
//!
//! Every committed transaction is one JSON line. A line is written and
//! flushed before the in-memory state changes, and a failed write is cut back
//! off the file, so replaying the journal reproduces exactly the committed
//! transactions. A torn trailing line left by a crash is discarded on open.
//!
//! Once the journal grows past the configured record count, the store
//! replaces it with a single [`JournalRecord::Snapshot`].

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EventError, Result};
use crate::store::PushTransaction;

/// One committed change to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    /// An event pushed to the queue, history and UI feed.
    Push(PushTransaction),
    /// The oldest queued event was handed to a consumer.
    Pop,
    /// Full store contents, replacing everything before it.
    Snapshot(Snapshot),
}

/// Full contents of the store at compaction time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Delivery queue, newest first.
    pub queue: Vec<String>,
    /// UI feed, newest first.
    pub ui_feed: Vec<String>,
    /// Per-trigger history in ascending timestamp order.
    pub history: BTreeMap<String, Vec<HistoryEntry>>,
}

/// One entry of a trigger's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The event timestamp the entry is ordered by.
    pub timestamp: i64,
    /// The stored event record.
    pub payload: String,
}

/// Append-only JSON-lines journal.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    /// Length of the committed prefix of the file.
    len: u64,
    records: usize,
    sync: bool,
}

impl Journal {
    /// Opens (or creates) a journal and returns the records it holds.
    ///
    /// With `sync` set, every append is followed by `fsync`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, read or truncated.
    pub fn open(path: impl Into<PathBuf>, sync: bool) -> Result<(Self, Vec<JournalRecord>)> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (records, len) = if path.exists() {
            Self::replay(&path)?
        } else {
            (Vec::new(), 0)
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        // Drop a torn tail so the next append starts on a fresh line.
        file.set_len(len)?;

        debug!(path = %path.display(), records = records.len(), "opened event journal");

        let journal = Self {
            path,
            file,
            len,
            records: records.len(),
            sync,
        };
        Ok((journal, records))
    }

    /// Reads every complete record and the length of the committed prefix.
    fn replay(path: &Path) -> Result<(Vec<JournalRecord>, u64)> {
        let bytes = fs::read(path)?;
        let mut records = Vec::new();
        let mut offset = 0usize;

        while let Some(pos) = bytes[offset..].iter().position(|b| *b == b'\n') {
            let line = &bytes[offset..offset + pos];
            offset += pos + 1;

            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<JournalRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "skipping malformed journal record"
                ),
            }
        }

        if offset < bytes.len() {
            warn!(
                path = %path.display(),
                bytes = bytes.len() - offset,
                "discarding torn journal tail"
            );
        }

        Ok((records, offset as u64))
    }

    /// Appends one record.
    ///
    /// On failure the file is cut back to its previous length, so the record
    /// is either fully committed or absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|e| EventError::Encode(e.to_string()))?;
        line.push(b'\n');

        if let Err(e) = self.write_line(&line) {
            if let Err(truncate_err) = self.file.set_len(self.len) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "failed to roll back partial journal write"
                );
            }
            return Err(e.into());
        }

        self.len += line.len() as u64;
        self.records += 1;
        Ok(())
    }

    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Replaces the journal with a single snapshot record.
    ///
    /// The snapshot is written to a sibling file and renamed over the
    /// journal, so a crash leaves either the old or the new journal. The
    /// append handle is opened on the sibling before the rename; on any
    /// error the old journal and its handle stay in use.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written or renamed.
    pub fn rewrite(&mut self, snapshot: Snapshot) -> Result<()> {
        let mut line = serde_json::to_vec(&JournalRecord::Snapshot(snapshot))
            .map_err(|e| EventError::Encode(e.to_string()))?;
        line.push(b'\n');

        let tmp_path = self.path.with_extension("compact");
        let file = match Self::write_snapshot(&tmp_path, &self.path, &line) {
            Ok(file) => file,
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&tmp_path) {
                    debug!(path = %tmp_path.display(), error = %remove_err, "no compaction file to remove");
                }
                return Err(e.into());
            }
        };

        self.file = file;
        self.len = line.len() as u64;
        self.records = 1;

        debug!(path = %self.path.display(), bytes = self.len, "compacted event journal");
        Ok(())
    }

    fn write_snapshot(tmp_path: &Path, path: &Path, line: &[u8]) -> std::io::Result<File> {
        {
            let mut tmp = File::create(tmp_path)?;
            tmp.write_all(line)?;
            tmp.sync_all()?;
        }
        let file = OpenOptions::new().append(true).open(tmp_path)?;
        fs::rename(tmp_path, path)?;
        Ok(file)
    }

    /// Returns the number of records in the journal.
    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) {
        self.file = file;
    }
}
