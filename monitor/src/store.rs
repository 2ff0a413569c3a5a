//! Durable per-file hash history records.
//!
//! Each watched file identity owns one JSON record named `<key>.json` inside
//! the store directory:
//!
//! ```json
//! {
//!   "path": "/home/user/notes.txt",
//!   "entries": [
//!     { "digest": "9f86d0...", "observedAt": "2024-01-01T10:00:00.123456Z" }
//!   ]
//! }
//! ```
//!
//! # Atomicity
//!
//! Every write serializes the full record into a temporary file in the same
//! directory, syncs it, and renames it over the canonical record. A crash
//! before the rename leaves the previous record untouched; readers never see a
//! partially written record. Leftover temporary files start with `.` and are
//! never read.
//!
//! # Concurrency
//!
//! Mutations must happen under [`HistoryStore::identity_lock`] so the
//! read-decide-write sequence of the reconciler is serialized per identity.
//! Reads need no lock since a rename always exposes a complete record.
//!
//! # Corruption
//!
//! A record that fails to parse, or violates the history invariants, yields
//! [`StoreError::CorruptRecord`]. Mutations load the record first, so a
//! corrupt record is never overwritten; it has to be repaired or removed by
//! hand.

use std::collections::HashMap;
use std::fs;
#[cfg(unix)]
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::identity::IdentityKey;
use crate::types::{FileHistory, HistoryEntry};

/// Errors that can occur while reading or writing history records.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store directory or record could not be accessed.
    #[error("history storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The on-disk record could not be parsed or is inconsistent.
    #[error("corrupt history record {}: {reason}", path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    /// A timestamp refresh was requested for an identity with no entries.
    #[error("no history entries recorded for identity {0}")]
    EmptyHistory(IdentityKey),

    /// The record could not be serialized.
    #[error("failed to serialize history record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// File-backed history store.
///
/// Durable storage is the only source of truth; nothing is cached between
/// calls.
pub struct HistoryStore {
    /// Directory holding one record per identity.
    dir: PathBuf,

    /// Per-identity mutation locks.
    locks: Mutex<HashMap<IdentityKey, Arc<Mutex<()>>>>,
}

impl HistoryStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store at the configured history directory.
    #[must_use]
    pub fn open(config: &Config) -> Self {
        Self::new(config.history_dir())
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the location of an identity's record.
    #[must_use]
    pub fn record_path(&self, key: &IdentityKey) -> PathBuf {
        self.dir.join(key.record_file_name())
    }

    /// Returns the mutex that serializes mutations of one identity.
    ///
    /// The same `Arc` is returned for the same key for the lifetime of the
    /// store.
    pub fn identity_lock(&self, key: &IdentityKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Loads the full history for an identity.
    ///
    /// A missing record yields an empty history.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageUnavailable`] if the record exists but
    /// cannot be read, and [`StoreError::CorruptRecord`] if it cannot be
    /// parsed or breaks the history invariants.
    pub fn load(&self, key: &IdentityKey) -> Result<FileHistory> {
        let path = self.record_path(key);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(identity = %key, "No history record yet");
                return Ok(FileHistory::default());
            }
            Err(source) => return Err(StoreError::StorageUnavailable { path, source }),
        };

        parse_record(&path, &data)
    }

    /// Returns the most recent entry for an identity, if any.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn last_entry(&self, key: &IdentityKey) -> Result<Option<HistoryEntry>> {
        Ok(self.load(key)?.entries.pop())
    }

    /// Appends an entry and persists the record.
    ///
    /// Only the reconciler should call this; it alone enforces the
    /// no-consecutive-duplicates rule. A timestamp older than the current last
    /// entry is raised to it so timestamps never go backwards.
    ///
    /// Returns the entry as committed.
    ///
    /// # Errors
    ///
    /// Fails if the existing record cannot be loaded or the new record cannot
    /// be written. Nothing is written in either case.
    pub fn append(
        &self,
        key: &IdentityKey,
        resolved_path: &Path,
        entry: HistoryEntry,
    ) -> Result<HistoryEntry> {
        let mut history = self.load(key)?;
        if history.path.is_none() {
            history.path = Some(resolved_path.to_path_buf());
        }

        let mut entry = entry;
        entry.observed_at = not_before(key, entry.observed_at, history.last());
        history.entries.push(entry.clone());

        self.commit(key, &history)?;

        debug!(
            identity = %key,
            digest = %entry.digest,
            entries = history.len(),
            "Appended history entry"
        );

        Ok(entry)
    }

    /// Updates the timestamp of the last entry and persists the record.
    ///
    /// Returns the updated entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyHistory`] if the identity has no entries,
    /// otherwise fails like [`append`](Self::append).
    pub fn refresh_last_timestamp(
        &self,
        key: &IdentityKey,
        observed_at: DateTime<Utc>,
    ) -> Result<HistoryEntry> {
        let mut history = self.load(key)?;

        let floor = history.last().cloned();
        let last = history
            .entries
            .last_mut()
            .ok_or_else(|| StoreError::EmptyHistory(key.clone()))?;
        last.observed_at = not_before(key, observed_at, floor.as_ref());
        let updated = last.clone();

        self.commit(key, &history)?;

        debug!(
            identity = %key,
            observed_at = %updated.observed_at,
            "Refreshed last entry timestamp"
        );

        Ok(updated)
    }

    /// Atomically replaces the record for `key` with `history`.
    fn commit(&self, key: &IdentityKey, history: &FileHistory) -> Result<()> {
        self.commit_with(key, history, persist_over)
    }

    /// Writes `history` to a synced temporary file, then hands it to
    /// `replace` to move it over the record. The record is not touched before
    /// `replace` runs.
    fn commit_with<F>(&self, key: &IdentityKey, history: &FileHistory, replace: F) -> Result<()>
    where
        F: FnOnce(NamedTempFile, &Path) -> io::Result<()>,
    {
        self.ensure_dir()?;

        let json = serde_json::to_vec_pretty(history)?;
        let target = self.record_path(key);
        let unavailable = |source: io::Error| StoreError::StorageUnavailable {
            path: target.clone(),
            source,
        };

        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(unavailable)?;
        temp_file.write_all(&json).map_err(unavailable)?;
        temp_file.write_all(b"\n").map_err(unavailable)?;
        temp_file.as_file().sync_all().map_err(unavailable)?;
        replace(temp_file, &target).map_err(unavailable)?;

        sync_dir(&self.dir);
        Ok(())
    }

    /// Creates the store directory if needed, owner-only on Unix.
    fn ensure_dir(&self) -> Result<()> {
        if self.dir.is_dir() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).map_err(|source| StoreError::StorageUnavailable {
            path: self.dir.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700)).map_err(
                |source| StoreError::StorageUnavailable {
                    path: self.dir.clone(),
                    source,
                },
            )?;
        }

        debug!(dir = %self.dir.display(), "Created history directory");
        Ok(())
    }
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Parses and validates a record.
fn parse_record(path: &Path, data: &[u8]) -> Result<FileHistory> {
    let corrupt = |reason: String| StoreError::CorruptRecord {
        path: path.to_path_buf(),
        reason,
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(corrupt("record is empty".to_string()));
    }

    let history: FileHistory =
        serde_json::from_slice(data).map_err(|e| corrupt(e.to_string()))?;

    if let Some((index, entry)) = history
        .iter()
        .enumerate()
        .find(|(_, entry)| !entry.is_well_formed())
    {
        return Err(corrupt(format!(
            "entry {} has malformed digest '{}'",
            index + 1,
            entry.digest
        )));
    }

    if !history.has_no_consecutive_duplicates() {
        return Err(corrupt("consecutive entries share a digest".to_string()));
    }

    if history
        .entries
        .windows(2)
        .any(|pair| pair[1].observed_at < pair[0].observed_at)
    {
        return Err(corrupt("timestamps are out of order".to_string()));
    }

    Ok(history)
}

/// Raises `observed_at` to the last entry's timestamp if the clock went back.
fn not_before(
    key: &IdentityKey,
    observed_at: DateTime<Utc>,
    last: Option<&HistoryEntry>,
) -> DateTime<Utc> {
    match last {
        Some(last) if observed_at < last.observed_at => {
            warn!(
                identity = %key,
                observed_at = %observed_at,
                last_observed_at = %last.observed_at,
                "Observation timestamp precedes last entry, clamping"
            );
            last.observed_at
        }
        _ => observed_at,
    }
}

/// Renames a synced temporary file over `target`.
fn persist_over(temp_file: NamedTempFile, target: &Path) -> io::Result<()> {
    temp_file.persist(target).map(drop).map_err(|e| e.error)
}

/// Flushes the directory entry after a rename. Failures only weaken durability
/// of the latest write, not its atomicity, so they are logged and ignored.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "Failed to sync history directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
