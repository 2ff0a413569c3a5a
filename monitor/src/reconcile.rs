//! Change detection against recorded history.
//!
//! The [`Reconciler`] is the only writer of history entries. For each
//! observation it compares the new digest with the last recorded one and
//! either appends a new entry or refreshes the last entry's timestamp, so
//! consecutive entries never repeat a digest.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use hashwatch::reconcile::Reconciler;
//! use hashwatch::store::HistoryStore;
//!
//! let reconciler = Reconciler::new(Arc::new(HistoryStore::new("/tmp/.hashwatch")));
//! let result = reconciler.check(Path::new("notes.txt")).unwrap();
//! println!("{:?}: {}", result.decision, result.entry.digest);
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::digest::{compute_digest, normalize_digest};
use crate::error::{MonitorError, Result};
use crate::identity::IdentityKey;
use crate::store::HistoryStore;
use crate::types::{Decision, FileHistory, HistoryEntry, Observation};

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// What was done to the history.
    pub decision: Decision,

    /// The last entry after the write.
    pub entry: HistoryEntry,

    /// Resolved path the observation was recorded under.
    pub path: PathBuf,
}

/// Decides between append and refresh and applies the result to the store.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Arc<HistoryStore>,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    /// Records an observed digest for `path`.
    ///
    /// The read-decide-write sequence runs under the identity's lock.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidDigest`] for a digest that is not 64 hex
    /// characters, [`MonitorError::Io`] if the path cannot be resolved, and
    /// [`MonitorError::Store`] if the history cannot be read or written. A
    /// failed write is never reported as a decision.
    pub fn reconcile(
        &self,
        path: &Path,
        digest: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<Reconciled> {
        let digest =
            normalize_digest(digest).ok_or_else(|| MonitorError::InvalidDigest(digest.to_string()))?;
        let (key, resolved) = IdentityKey::for_path(path)?;

        let lock = self.store.identity_lock(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (decision, entry) = match self.store.last_entry(&key)? {
            None => {
                let entry = self
                    .store
                    .append(&key, &resolved, HistoryEntry::new(digest, observed_at))?;
                (Decision::AddedInitial, entry)
            }
            Some(last) if !last.has_digest(&digest) => {
                let entry = self
                    .store
                    .append(&key, &resolved, HistoryEntry::new(digest, observed_at))?;
                (Decision::AddedChanged, entry)
            }
            Some(_) => {
                let entry = self.store.refresh_last_timestamp(&key, observed_at)?;
                (Decision::Refreshed, entry)
            }
        };

        match decision {
            Decision::AddedInitial => info!(
                path = %resolved.display(),
                digest = %entry.digest,
                "Initial hash stored"
            ),
            Decision::AddedChanged => info!(
                path = %resolved.display(),
                digest = %entry.digest,
                "Hash changed, new entry recorded"
            ),
            Decision::Refreshed => debug!(
                path = %resolved.display(),
                "Hash unchanged, timestamp refreshed"
            ),
        }

        Ok(Reconciled {
            decision,
            entry,
            path: resolved,
        })
    }

    /// Records an [`Observation`] produced by the digest engine.
    ///
    /// # Errors
    ///
    /// Same as [`reconcile`](Self::reconcile).
    pub fn record(&self, path: &Path, observation: &Observation) -> Result<Reconciled> {
        self.reconcile(path, &observation.digest, observation.observed_at)
    }

    /// One-shot check: digests the file and records the result.
    ///
    /// # Errors
    ///
    /// Digest errors abort the check before anything is written; otherwise
    /// fails like [`reconcile`](Self::reconcile).
    pub fn check(&self, path: &Path) -> Result<Reconciled> {
        let observation = compute_digest(path)?;
        self.record(path, &observation)
    }

    /// Returns the recorded history for `path`, oldest first.
    ///
    /// # Errors
    ///
    /// Fails if the path cannot be resolved or the record cannot be loaded.
    pub fn history(&self, path: &Path) -> Result<FileHistory> {
        let (key, _) = IdentityKey::for_path(path)?;
        Ok(self.store.load(&key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use tempfile::TempDir;

    const D1: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
    const D2: &str = "60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752";

    fn create_reconciler() -> (TempDir, Reconciler) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = HistoryStore::new(temp_dir.path().join(".hashwatch"));
        (temp_dir, Reconciler::new(Arc::new(store)))
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_first_observation_is_initial() {
        let (dir, reconciler) = create_reconciler();
        let path = dir.path().join("a.txt");

        let result = reconciler.reconcile(&path, D1, ts(0)).unwrap();
        assert_eq!(result.decision, Decision::AddedInitial);
        assert_eq!(result.entry, HistoryEntry::new(D1, ts(0)));
    }

    #[test]
    fn test_uppercase_digest_matches_stored_lowercase() {
        let (dir, reconciler) = create_reconciler();
        let path = dir.path().join("a.txt");

        reconciler.reconcile(&path, D1, ts(0)).unwrap();
        let result = reconciler
            .reconcile(&path, &D1.to_uppercase(), ts(5))
            .unwrap();

        assert_eq!(result.decision, Decision::Refreshed);
        assert_eq!(reconciler.history(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_changed_digest_appends() {
        let (dir, reconciler) = create_reconciler();
        let path = dir.path().join("a.txt");

        reconciler.reconcile(&path, D1, ts(0)).unwrap();
        let result = reconciler.reconcile(&path, D2, ts(5)).unwrap();

        assert_eq!(result.decision, Decision::AddedChanged);
        assert_eq!(reconciler.history(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_digest_rejected_without_write() {
        let (dir, reconciler) = create_reconciler();
        let path = dir.path().join("a.txt");

        let err = reconciler.reconcile(&path, "not-a-digest", ts(0)).unwrap_err();
        assert!(matches!(err, MonitorError::InvalidDigest(_)));
        assert!(reconciler.history(&path).unwrap().is_empty());
    }

    #[test]
    fn test_check_missing_file_writes_nothing() {
        let (dir, reconciler) = create_reconciler();
        let path = dir.path().join("missing.txt");

        let err = reconciler.check(&path).unwrap_err();
        assert!(matches!(err, MonitorError::Digest(_)));
        assert!(!reconciler.store().dir().exists());
    }

    #[test]
    fn test_check_records_file_digest() {
        let (dir, reconciler) = create_reconciler();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        let first = reconciler.check(&path).unwrap();
        assert_eq!(first.decision, Decision::AddedInitial);
        assert_eq!(
            first.entry.digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let second = reconciler.check(&path).unwrap();
        assert_eq!(second.decision, Decision::Refreshed);

        std::fs::write(&path, b"hello, world").unwrap();
        let third = reconciler.check(&path).unwrap();
        assert_eq!(third.decision, Decision::AddedChanged);
    }

    #[test]
    fn test_corrupt_record_surfaces_and_blocks_writes() {
        let (dir, reconciler) = create_reconciler();
        let path = dir.path().join("a.txt");
        let (key, _) = IdentityKey::for_path(&path).unwrap();
        let record = reconciler.store().record_path(&key);
        std::fs::create_dir_all(reconciler.store().dir()).unwrap();
        std::fs::write(&record, b"[garbage").unwrap();

        let err = reconciler.reconcile(&path, D1, ts(0)).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Store(StoreError::CorruptRecord { .. })
        ));
        assert_eq!(std::fs::read(&record).unwrap(), b"[garbage");
    }

    #[test]
    fn test_concurrent_reconciles_keep_invariant() {
        let (dir, reconciler) = create_reconciler();
        let path = dir.path().join("shared.txt");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reconciler = reconciler.clone();
                let path = path.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        let digest = if (i + j) % 3 == 0 { D1 } else { D2 };
                        reconciler.reconcile(&path, digest, Utc::now()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = reconciler.history(&path).unwrap();
        assert!(!history.is_empty());
        assert!(history.has_no_consecutive_duplicates());
    }
}
