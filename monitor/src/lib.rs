//! hashwatch - per-file content hash history.
//!
//! This crate records the SHA-256 history of individual files. Each
//! observation is compared with the last recorded digest: a new digest is
//! appended, an unchanged one only refreshes the last entry's timestamp.
//! History is stored as one JSON record per file, replaced atomically on
//! every write.
//!
//! # Overview
//!
//! A one-shot check ([`Reconciler::check`]) digests a file and records the
//! result. A [`WatchSession`] repeats that on a fixed interval for a single
//! file until stopped.
//!
//! # Modules
//!
//! - [`types`]: History entries, file histories and decisions
//! - [`digest`]: Streaming SHA-256 of file contents
//! - [`identity`]: Path-derived identity keys
//! - [`store`]: Atomic per-file history records
//! - [`reconcile`]: Append-or-refresh decisions
//! - [`session`]: Single-file polling watch
//! - [`report`]: Console formatting
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types

pub mod config;
pub mod digest;
pub mod error;
pub mod identity;
pub mod reconcile;
pub mod report;
pub mod session;
pub mod store;
pub mod types;

pub use config::{Config, ConfigError, WatchConfig};
pub use digest::{compute_digest, DigestError};
pub use error::{MonitorError, Result};
pub use identity::IdentityKey;
pub use reconcile::{Reconciled, Reconciler};
pub use session::{WatchError, WatchEvent, WatchSession};
pub use store::{HistoryStore, StoreError};
pub use types::{Decision, FileHistory, HistoryEntry, Observation};
