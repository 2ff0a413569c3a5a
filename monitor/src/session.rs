//! Watch session: polls one file at a time until stopped.
//!
//! # State Machine
//!
//! ```text
//!          start(path)                stop()
//!   Idle ───────────────▶ Watching ───────────▶ Idle
//!    ▲                       │
//!    └───────────────────────┘  loop halts on a corrupt record
//! ```
//!
//! Only one file can be watched per session. A second `start` is rejected
//! with [`WatchError::AlreadyWatching`] and leaves the running watch alone;
//! `stop` on an idle session is rejected with [`WatchError::NotWatching`].
//!
//! # Loop
//!
//! Each cycle digests the file on the blocking pool, reconciles the result,
//! reports a [`WatchEvent`], and sleeps for the configured interval. Digest
//! and storage failures are reported and retried after a shorter backoff. A
//! corrupt history record ends the loop, since automated writes to it must
//! stop until it is repaired. Cancellation is checked at the top of every
//! cycle and interrupts the sleep immediately.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::digest::compute_digest_async;
use crate::error::MonitorError;
use crate::reconcile::Reconciler;
use crate::types::{Decision, HistoryEntry};

/// Rejections from the watch session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// A watch is already running.
    #[error("already watching {}; stop it first", target.display())]
    AlreadyWatching { target: PathBuf },

    /// No watch is running.
    #[error("no file is currently being watched")]
    NotWatching,
}

/// Progress reported by the watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The file was digested and its history updated.
    Observed {
        path: PathBuf,
        decision: Decision,
        entry: HistoryEntry,
    },

    /// The cycle failed; the loop retries after the backoff.
    Failed { path: PathBuf, message: String },

    /// The loop stopped itself because the history record is corrupt.
    Halted { path: PathBuf, message: String },
}

/// A running watch.
struct ActiveWatch {
    target: PathBuf,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

enum State {
    Idle,
    Watching(ActiveWatch),
}

impl State {
    /// Drops a watch whose loop has already exited on its own.
    fn reap_finished(&mut self) {
        if let State::Watching(active) = self {
            if active.handle.is_finished() {
                debug!(path = %active.target.display(), "Reaping finished watch");
                *self = State::Idle;
            }
        }
    }
}

/// Owns the single active watch of a process.
pub struct WatchSession {
    reconciler: Reconciler,
    config: WatchConfig,
    events: Option<mpsc::Sender<WatchEvent>>,
    state: Mutex<State>,
}

impl WatchSession {
    /// Creates an idle session.
    #[must_use]
    pub fn new(reconciler: Reconciler, config: WatchConfig) -> Self {
        Self {
            reconciler,
            config,
            events: None,
            state: Mutex::new(State::Idle),
        }
    }

    /// Sends loop progress to `events`.
    ///
    /// Events are dropped rather than stalling the loop when the channel is
    /// full.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<WatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Starts watching `path` in a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::AlreadyWatching`] if a watch is running; the
    /// running watch is not affected.
    pub async fn start(&self, path: impl Into<PathBuf>) -> Result<(), WatchError> {
        let mut state = self.state.lock().await;
        state.reap_finished();

        if let State::Watching(active) = &*state {
            warn!(
                requested = %path.into().display(),
                current = %active.target.display(),
                "Rejected watch request, already watching"
            );
            return Err(WatchError::AlreadyWatching {
                target: active.target.clone(),
            });
        }

        let target = path.into();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_watch_loop(
            target.clone(),
            self.reconciler.clone(),
            self.config,
            token.clone(),
            self.events.clone(),
        ));

        *state = State::Watching(ActiveWatch {
            target,
            token,
            handle,
        });
        Ok(())
    }

    /// Stops the running watch and waits for its loop to exit.
    ///
    /// Returns the path that was being watched.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NotWatching`] if the session is idle; the state
    /// is left unchanged.
    pub async fn stop(&self) -> Result<PathBuf, WatchError> {
        let mut state = self.state.lock().await;
        state.reap_finished();

        let active = match std::mem::replace(&mut *state, State::Idle) {
            State::Watching(active) => active,
            State::Idle => return Err(WatchError::NotWatching),
        };

        active.token.cancel();
        if let Err(e) = active.handle.await {
            error!(path = %active.target.display(), error = %e, "Watch task ended abnormally");
        }

        info!(path = %active.target.display(), "Stopped watching");
        Ok(active.target)
    }

    /// Returns `true` while a watch loop is running.
    pub async fn is_watching(&self) -> bool {
        let mut state = self.state.lock().await;
        state.reap_finished();
        matches!(*state, State::Watching(_))
    }

    /// Returns the path being watched, if any.
    pub async fn target(&self) -> Option<PathBuf> {
        let mut state = self.state.lock().await;
        state.reap_finished();
        match &*state {
            State::Watching(active) => Some(active.target.clone()),
            State::Idle => None,
        }
    }
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("config", &self.config)
            .field("has_events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

/// Outcome of a single cycle.
enum Cycle {
    /// Sleep this long, then run the next cycle.
    Continue(Duration),
    /// Exit the loop.
    Halt,
}

/// Polls `target` until `token` is cancelled or the record turns out corrupt.
async fn run_watch_loop(
    target: PathBuf,
    reconciler: Reconciler,
    config: WatchConfig,
    token: CancellationToken,
    events: Option<mpsc::Sender<WatchEvent>>,
) {
    info!(
        path = %target.display(),
        interval_secs = config.interval.as_secs_f64(),
        "Now watching"
    );

    loop {
        if token.is_cancelled() {
            break;
        }

        let delay = match run_cycle(&target, &reconciler, config, events.as_ref()).await {
            Cycle::Continue(delay) => delay,
            Cycle::Halt => break,
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!(path = %target.display(), "Watch loop exited");
}

async fn run_cycle(
    target: &Path,
    reconciler: &Reconciler,
    config: WatchConfig,
    events: Option<&mpsc::Sender<WatchEvent>>,
) -> Cycle {
    let observation = match compute_digest_async(target.to_path_buf()).await {
        Ok(observation) => observation,
        Err(e) => {
            warn!(path = %target.display(), error = %e, "Error reading file, retrying");
            emit(
                events,
                WatchEvent::Failed {
                    path: target.to_path_buf(),
                    message: e.to_string(),
                },
            );
            return Cycle::Continue(config.retry_backoff);
        }
    };

    let task_reconciler = reconciler.clone();
    let task_path = target.to_path_buf();
    let outcome =
        tokio::task::spawn_blocking(move || task_reconciler.record(&task_path, &observation))
            .await
            .unwrap_or_else(|e| Err(MonitorError::Io(std::io::Error::other(e))));

    match outcome {
        Ok(reconciled) => {
            emit(
                events,
                WatchEvent::Observed {
                    path: target.to_path_buf(),
                    decision: reconciled.decision,
                    entry: reconciled.entry,
                },
            );
            Cycle::Continue(config.interval)
        }
        Err(e) if e.is_corrupt_record() => {
            error!(
                path = %target.display(),
                error = %e,
                "History record is corrupt, stopping watch"
            );
            emit(
                events,
                WatchEvent::Halted {
                    path: target.to_path_buf(),
                    message: e.to_string(),
                },
            );
            Cycle::Halt
        }
        Err(e) => {
            warn!(path = %target.display(), error = %e, "Failed to record hash, retrying");
            emit(
                events,
                WatchEvent::Failed {
                    path: target.to_path_buf(),
                    message: e.to_string(),
                },
            );
            Cycle::Continue(config.retry_backoff)
        }
    }
}

/// Reports an event without blocking the loop.
fn emit(events: Option<&mpsc::Sender<WatchEvent>>, event: WatchEvent) {
    let Some(tx) = events else {
        return;
    };
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Watch event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Watch event receiver dropped");
        }
    }
}
