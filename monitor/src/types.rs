//! Core data types for hash history tracking.
//!
//! These types form the on-disk record schema. Entries serialize to camelCase
//! JSON with RFC 3339 timestamps so a history file can be read by hand.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::{digests_match, normalize_digest};

/// A single `(digest, timestamp)` observation of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Lowercase hex SHA-256 digest of the file contents.
    pub digest: String,

    /// When this digest was last observed.
    pub observed_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Creates an entry, lowercasing the digest.
    ///
    /// The digest is not validated here; use [`normalize_digest`] first when
    /// the input comes from outside the digest engine.
    #[must_use]
    pub fn new(digest: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            digest: digest.into().to_ascii_lowercase(),
            observed_at,
        }
    }

    /// Returns `true` if this entry records the given digest (case-insensitive).
    #[must_use]
    pub fn has_digest(&self, digest: &str) -> bool {
        digests_match(&self.digest, digest)
    }

    /// Returns `true` if the stored digest is a well-formed SHA-256 hex string.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        normalize_digest(&self.digest).is_some_and(|d| d == self.digest)
    }
}

/// The ordered observation history of one file.
///
/// Insertion order is chronological; the last entry is the most recent
/// observation. Consecutive entries never share a digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistory {
    /// Resolved path the history belongs to, kept for human inspection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Entries, oldest first.
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
}

impl FileHistory {
    #[must_use]
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HistoryEntry> {
        self.entries.iter()
    }

    /// Returns `true` if no two consecutive entries share a digest.
    #[must_use]
    pub fn has_no_consecutive_duplicates(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| !digests_match(&pair[0].digest, &pair[1].digest))
    }
}

impl<'a> IntoIterator for &'a FileHistory {
    type Item = &'a HistoryEntry;
    type IntoIter = std::slice::Iter<'a, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Result of a single digest computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Lowercase hex digest.
    pub digest: String,
    /// Captured when the read completed.
    pub observed_at: DateTime<Utc>,
}

/// Outcome of reconciling an observation against stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// First observation of the path; a new entry was appended.
    AddedInitial,
    /// Digest differs from the last entry; a new entry was appended.
    AddedChanged,
    /// Digest matches the last entry; its timestamp was refreshed.
    Refreshed,
}

impl Decision {
    /// Returns `true` if the decision appended a new entry.
    #[must_use]
    pub fn appended(self) -> bool {
        matches!(self, Self::AddedInitial | Self::AddedChanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D1: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
    const D2: &str = "60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752";

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_entry_normalizes_digest_case() {
        let entry = HistoryEntry::new(D1.to_uppercase(), ts("2024-01-01T00:00:00Z"));
        assert_eq!(entry.digest, D1);
        assert!(entry.is_well_formed());
    }

    #[test]
    fn test_entry_has_digest_ignores_case() {
        let entry = HistoryEntry::new(D1, ts("2024-01-01T00:00:00Z"));
        assert!(entry.has_digest(&D1.to_uppercase()));
        assert!(!entry.has_digest(D2));
    }

    #[test]
    fn test_entry_malformed_digest_detected() {
        let entry = HistoryEntry::new("abc123", ts("2024-01-01T00:00:00Z"));
        assert!(!entry.is_well_formed());
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let entry = HistoryEntry::new(D1, ts("2024-01-01T12:30:45.123456789Z"));
        let json = serde_json::to_string(&entry).unwrap();

        assert!(json.contains("\"observedAt\""));
        assert!(json.contains("2024-01-01T12:30:45.123456789Z"));

        let back: HistoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_history_detects_consecutive_duplicates() {
        let mut history = FileHistory::default();
        history
            .entries
            .push(HistoryEntry::new(D1, ts("2024-01-01T00:00:00Z")));
        history
            .entries
            .push(HistoryEntry::new(D2, ts("2024-01-01T00:00:05Z")));
        history
            .entries
            .push(HistoryEntry::new(D1, ts("2024-01-01T00:00:10Z")));
        assert!(history.has_no_consecutive_duplicates());

        history
            .entries
            .push(HistoryEntry::new(D1.to_uppercase(), ts("2024-01-01T00:00:15Z")));
        assert!(!history.has_no_consecutive_duplicates());
    }

    #[test]
    fn test_history_without_path_omits_field() {
        let history = FileHistory::default();
        let json = serde_json::to_string(&history).unwrap();
        assert_eq!(json, r#"{"entries":[]}"#);
    }

    #[test]
    fn test_history_accepts_missing_entries_field() {
        let history: FileHistory = serde_json::from_str(r#"{"path":"/tmp/a"}"#).unwrap();
        assert!(history.is_empty());
        assert_eq!(history.path, Some(PathBuf::from("/tmp/a")));
    }

    #[test]
    fn test_decision_appended() {
        assert!(Decision::AddedInitial.appended());
        assert!(Decision::AddedChanged.appended());
        assert!(!Decision::Refreshed.appended());
    }

    #[test]
    fn test_decision_serialization() {
        assert_eq!(
            serde_json::to_string(&Decision::AddedInitial).unwrap(),
            "\"added_initial\""
        );
        assert_eq!(
            serde_json::to_string(&Decision::Refreshed).unwrap(),
            "\"refreshed\""
        );
    }
}
