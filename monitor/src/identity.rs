//! Deterministic identity keys for watched files.
//!
//! A file's identity is derived from its resolved absolute path, never its
//! content, so history survives edits but stays distinct per path. The key is
//! the SHA-256 of the path bytes, which makes it safe to use as a filename and
//! stable across restarts.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Extension of persisted history records.
const RECORD_EXTENSION: &str = "json";

/// Identity of a watched file: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derives the key for a path after resolving it.
    ///
    /// # Errors
    ///
    /// Fails only if the path cannot be made absolute (for example, when the
    /// current directory is unavailable).
    pub fn for_path(path: &Path) -> io::Result<(Self, PathBuf)> {
        let resolved = resolve_path(path)?;
        Ok((Self::from_resolved(&resolved), resolved))
    }

    /// Derives the key for an already resolved path.
    #[must_use]
    pub fn from_resolved(resolved: &Path) -> Self {
        let digest = Sha256::digest(resolved.as_os_str().as_encoded_bytes());
        Self(format!("{digest:x}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename of this identity's history record.
    #[must_use]
    pub fn record_file_name(&self) -> String {
        format!("{}.{RECORD_EXTENSION}", self.0)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves a path to its canonical absolute form.
///
/// Symlinks and `..` components are resolved when the file exists. For a
/// missing file the parent directory is canonicalized and the file name
/// re-attached, so the history of a deleted file can still be looked up under
/// the key it was recorded with.
///
/// # Errors
///
/// Returns an error if the path is empty or the current directory cannot be
/// determined.
pub fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }

    let absolute = std::path::absolute(path)?;
    let parent = absolute.parent().and_then(|p| std::fs::canonicalize(p).ok());
    match (parent, absolute.file_name()) {
        (Some(parent), Some(name)) => Ok(parent.join(name)),
        _ => Ok(absolute),
    }
}
