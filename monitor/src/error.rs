//! Error types for hashwatch.
//!
//! Each component defines its own error enum next to its code; this module
//! collects them into [`MonitorError`] for callers that drive several
//! components at once.

use thiserror::Error;

use crate::config::ConfigError;
use crate::digest::DigestError;
use crate::session::WatchError;
use crate::store::StoreError;

/// Errors that can occur during hashwatch operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The file could not be digested.
    #[error(transparent)]
    Digest(#[from] DigestError),

    /// History could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A watch request was rejected by the session state machine.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// A digest supplied for reconciliation is not 64 hex characters.
    #[error("invalid digest: '{0}'")]
    InvalidDigest(String),

    /// File system I/O error outside the digest and store paths, such as
    /// resolving a relative path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Returns `true` if this error means a history record is corrupt and
    /// must not be mutated further until repaired by hand.
    #[must_use]
    pub fn is_corrupt_record(&self) -> bool {
        matches!(self, Self::Store(StoreError::CorruptRecord { .. }))
    }
}

/// A specialized `Result` type for hashwatch operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn config_error_display() {
        let err = MonitorError::Config(ConfigError::NoHomeDirectory);
        assert_eq!(
            err.to_string(),
            "configuration error: failed to determine home directory"
        );
    }

    #[test]
    fn digest_error_is_transparent() {
        let err: MonitorError = DigestError::NotFound {
            path: PathBuf::from("/x"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into();
        assert_eq!(err.to_string(), "cannot open /x: gone");
    }

    #[test]
    fn watch_error_conversion() {
        let err: MonitorError = WatchError::NotWatching.into();
        assert!(matches!(err, MonitorError::Watch(WatchError::NotWatching)));
    }

    #[test]
    fn corrupt_record_detection() {
        let corrupt: MonitorError = StoreError::CorruptRecord {
            path: PathBuf::from("/h/r.json"),
            reason: "bad".to_string(),
        }
        .into();
        assert!(corrupt.is_corrupt_record());

        let other = MonitorError::InvalidDigest("zz".to_string());
        assert!(!other.is_corrupt_record());
        assert_eq!(other.to_string(), "invalid digest: 'zz'");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: MonitorError = io_err.into();
        assert!(matches!(err, MonitorError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error;

        let err: MonitorError = StoreError::StorageUnavailable {
            path: PathBuf::from("/h"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();

        assert!(err.source().is_some());
    }
}
