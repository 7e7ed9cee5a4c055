// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Deduplicated, size-bounded log history with overflow archiving.
//!
//! `merge` only touches memory. `flush` writes whatever the merges left
//! behind: pending archive batches first, then the history table. Both
//! writes replace whole files through a temp file and a rename.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{IdentityKey, LogEntry};
use crate::persist::{self, LoadOutcome};

const ARCHIVE_PREFIX: &str = "lucky_logs_";

/// Failure writing history or archive files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Effect of one merge call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Candidates that were not already retained
    pub added: usize,
    /// Entries pushed past the retention bound by this merge
    pub evicted: usize,
}

/// What a flush wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub history_written: bool,
    pub archives: Vec<PathBuf>,
}

/// The retained history and its backing files.
#[derive(Debug)]
pub struct HistoryStore {
    entries: Vec<LogEntry>,
    max_log_count: usize,
    history_path: PathBuf,
    archive_dir: PathBuf,
    /// Evicted batches not yet written, oldest first
    pending_archives: Vec<Vec<LogEntry>>,
    /// History differs from the file on disk
    dirty: bool,
}

impl HistoryStore {
    /// Empty store; nothing is read from disk.
    pub fn new(history_path: PathBuf, archive_dir: PathBuf, max_log_count: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_log_count,
            history_path,
            archive_dir,
            pending_archives: Vec::new(),
            dirty: false,
        }
    }

    /// Load the history table, falling back to an empty history.
    ///
    /// A table that does not decode is moved aside as `<name>.corrupt`.
    pub fn load_or_default(
        history_path: PathBuf,
        archive_dir: PathBuf,
        max_log_count: usize,
    ) -> (Self, LoadOutcome) {
        let mut store = Self::new(history_path, archive_dir, max_log_count);

        if !store.history_path.exists() {
            return (store, LoadOutcome::Absent);
        }

        match read_table(&store.history_path) {
            Ok(entries) => {
                debug!(path = %store.history_path.display(), entries = entries.len(), "Loaded history");
                store.entries = entries;
                (store, LoadOutcome::Loaded)
            }
            Err(e) => {
                warn!(path = %store.history_path.display(), error = %e, "History table corrupt, starting empty");
                let moved_to = persist::move_aside(&store.history_path);
                (store, LoadOutcome::CorruptReset { moved_to })
            }
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a flush has work to do.
    pub fn needs_flush(&self) -> bool {
        self.dirty || !self.pending_archives.is_empty()
    }

    /// Merge candidates into the history.
    ///
    /// Unseen entries are appended; when at least one was added the history
    /// is re-sorted newest first (equal timestamps keep their relative
    /// order) and everything past the bound is queued as one archive batch.
    /// When nothing was added the history is left untouched.
    pub fn merge<I>(&mut self, candidates: I) -> MergeOutcome
    where
        I: IntoIterator<Item = LogEntry>,
    {
        let mut seen: HashSet<IdentityKey> = self.entries.iter().map(LogEntry::identity).collect();

        let mut added = 0;
        for candidate in candidates {
            if seen.insert(candidate.identity()) {
                self.entries.push(candidate);
                added += 1;
            }
        }

        if added == 0 {
            return MergeOutcome::default();
        }

        self.entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.dirty = true;

        let mut evicted = 0;
        if self.entries.len() > self.max_log_count {
            let overflow = self.entries.split_off(self.max_log_count);
            evicted = overflow.len();
            self.pending_archives.push(overflow);
        }

        MergeOutcome { added, evicted }
    }

    /// Write pending archive batches, then the history table if it changed.
    ///
    /// Anything that fails to write stays pending for the next call.
    pub fn flush(&mut self) -> Result<FlushReport, StoreError> {
        let mut report = FlushReport::default();

        while let Some(batch) = self.pending_archives.first() {
            let path = self.next_archive_path();
            write_table(&path, batch)?;
            info!(path = %path.display(), entries = batch.len(), "Archived evicted entries");
            report.archives.push(path);
            self.pending_archives.remove(0);
        }

        if self.dirty {
            write_table(&self.history_path, &self.entries)?;
            self.dirty = false;
            report.history_written = true;
        }

        Ok(report)
    }

    /// Archive file name from the current local time, made unique within
    /// the directory.
    fn next_archive_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.archive_dir.join(format!("{ARCHIVE_PREFIX}{stamp}.csv"));
        let mut n = 1;
        while path.exists() {
            path = self.archive_dir.join(format!("{ARCHIVE_PREFIX}{stamp}_{n}.csv"));
            n += 1;
        }
        path
    }
}

/// Read a history or archive table.
pub fn read_table(path: &Path) -> Result<Vec<LogEntry>, csv::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    reader.deserialize().collect()
}

fn write_table(path: &Path, entries: &[LogEntry]) -> Result<(), StoreError> {
    let csv_error = |source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    if entries.is_empty() {
        writer
            .write_record(["time", "ip", "host", "method", "url", "rule"])
            .map_err(csv_error)?;
    }
    for entry in entries {
        writer.serialize(entry).map_err(csv_error)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv_error(e.into_error().into()))?;

    persist::write_atomic(path, &bytes).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
