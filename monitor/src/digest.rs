//! Streaming SHA-256 digests of file contents.
//!
//! Files are read in fixed-size chunks so memory use stays bounded regardless
//! of file size. The observation timestamp is taken once the read completes.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use hashwatch::digest::compute_digest;
//!
//! let observation = compute_digest(Path::new("/etc/hosts")).unwrap();
//! println!("{} at {}", observation.digest, observation.observed_at);
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::trace;

use crate::types::Observation;

/// Size of each read from the file.
const CHUNK_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Errors that can occur while computing a digest.
#[derive(Error, Debug)]
pub enum DigestError {
    /// The file does not exist or cannot be opened.
    #[error("cannot open {}: {source}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An I/O error occurred while streaming the file.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns [`DigestError::NotFound`] if the file cannot be opened and
/// [`DigestError::ReadFailure`] if reading fails part way through.
pub fn compute_digest(path: &Path) -> Result<Observation, DigestError> {
    let file = File::open(path).map_err(|source| DigestError::NotFound {
        path: path.to_path_buf(),
        source,
    })?;

    let digest = hash_reader(file).map_err(|source| DigestError::ReadFailure {
        path: path.to_path_buf(),
        source,
    })?;

    let observation = Observation {
        digest,
        observed_at: Utc::now(),
    };

    trace!(
        path = %path.display(),
        digest = %observation.digest,
        "Computed digest"
    );

    Ok(observation)
}

/// Computes a digest on the blocking thread pool.
///
/// # Errors
///
/// Same as [`compute_digest`]. A panicked or cancelled blocking task is
/// reported as [`DigestError::ReadFailure`].
pub async fn compute_digest_async(path: PathBuf) -> Result<Observation, DigestError> {
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || compute_digest(&task_path))
        .await
        .map_err(|e| DigestError::ReadFailure {
            path,
            source: io::Error::other(e),
        })?
}

/// Streams a reader through SHA-256 and returns the lowercase hex digest.
fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Validates a hex digest and returns it lowercased.
///
/// Returns `None` unless the input is exactly 64 hexadecimal characters.
#[must_use]
pub fn normalize_digest(digest: &str) -> Option<String> {
    if digest.len() != DIGEST_HEX_LEN || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(digest.to_ascii_lowercase())
}

/// Compares two digests ignoring ASCII case.
#[must_use]
pub fn digests_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
