//! Integration tests for the watch session state machine.
//!
//! A session watches at most one file. Starting a second watch or stopping an
//! idle session is rejected without disturbing the current state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use hashwatch::config::WatchConfig;
use hashwatch::reconcile::Reconciler;
use hashwatch::session::{WatchError, WatchEvent, WatchSession};
use hashwatch::store::HistoryStore;
use hashwatch::types::Decision;

// =============================================================================
// Test Helpers
// =============================================================================

fn fast_config() -> WatchConfig {
    WatchConfig {
        interval: Duration::from_millis(40),
        retry_backoff: Duration::from_millis(20),
    }
}

struct Harness {
    dir: TempDir,
    reconciler: Reconciler,
    session: WatchSession,
    events: mpsc::Receiver<WatchEvent>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let reconciler =
            Reconciler::new(Arc::new(HistoryStore::new(dir.path().join(".hashwatch"))));
        let (tx, events) = mpsc::channel(256);
        let session = WatchSession::new(reconciler.clone(), fast_config()).with_events(tx);
        Self {
            dir,
            reconciler,
            session,
            events,
        }
    }

    fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn next_event(&mut self) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for watch event")
            .expect("event channel closed")
    }

    /// Waits until an observation for `path` is reported.
    async fn next_observation_of(&mut self, path: &PathBuf) -> Decision {
        loop {
            if let WatchEvent::Observed {
                path: observed,
                decision,
                ..
            } = self.next_event().await
            {
                if &observed == path {
                    return decision;
                }
            }
        }
    }
}

// =============================================================================
// State Machine
// =============================================================================

#[tokio::test]
async fn test_start_while_watching_is_rejected() {
    let mut h = Harness::new();
    let first = h.write_file("first.txt", b"first");
    let second = h.write_file("second.txt", b"second");

    h.session.start(&first).await.unwrap();
    assert_eq!(
        h.next_observation_of(&first).await,
        Decision::AddedInitial
    );

    let err = h.session.start(&second).await.unwrap_err();
    assert_eq!(
        err,
        WatchError::AlreadyWatching {
            target: first.clone()
        }
    );
    assert!(h.session.is_watching().await);
    assert_eq!(h.session.target().await, Some(first.clone()));

    // The original watch keeps polling its own file.
    assert_eq!(h.next_observation_of(&first).await, Decision::Refreshed);

    h.session.stop().await.unwrap();
    assert!(h.reconciler.history(&second).unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_while_idle_is_rejected() {
    let h = Harness::new();

    assert_eq!(h.session.stop().await, Err(WatchError::NotWatching));
    assert!(!h.session.is_watching().await);
    assert_eq!(h.session.target().await, None);

    // Rejection leaves the session usable.
    let path = h.write_file("after.txt", b"x");
    h.session.start(&path).await.unwrap();
    assert!(h.session.is_watching().await);
    assert_eq!(h.session.stop().await, Ok(path));
}

#[tokio::test]
async fn test_stop_twice_reports_not_watching() {
    let h = Harness::new();
    let path = h.write_file("once.txt", b"x");

    h.session.start(&path).await.unwrap();
    assert_eq!(h.session.stop().await, Ok(path));
    assert_eq!(h.session.stop().await, Err(WatchError::NotWatching));
}

// =============================================================================
// Loop Behavior
// =============================================================================

#[tokio::test]
async fn test_watch_records_changes_made_while_running() {
    let mut h = Harness::new();
    let path = h.write_file("live.txt", b"v1");

    h.session.start(&path).await.unwrap();
    assert_eq!(h.next_observation_of(&path).await, Decision::AddedInitial);

    std::fs::write(&path, b"v2").unwrap();
    loop {
        if h.next_observation_of(&path).await == Decision::AddedChanged {
            break;
        }
    }

    h.session.stop().await.unwrap();

    let history = h.reconciler.history(&path).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.has_no_consecutive_duplicates());
}

#[tokio::test]
async fn test_no_writes_after_stop_returns() {
    let mut h = Harness::new();
    let path = h.write_file("quiet.txt", b"v1");

    h.session.start(&path).await.unwrap();
    h.next_observation_of(&path).await;
    h.session.stop().await.unwrap();

    let stopped_at = h.reconciler.history(&path).unwrap();
    std::fs::write(&path, b"v2").unwrap();
    tokio::time::sleep(fast_config().interval * 5).await;

    assert_eq!(h.reconciler.history(&path).unwrap(), stopped_at);
}

#[tokio::test]
async fn test_unreadable_file_reports_failure_and_keeps_watching() {
    let mut h = Harness::new();
    let path = h.dir.path().join("not-yet.txt");

    h.session.start(&path).await.unwrap();
    match h.next_event().await {
        WatchEvent::Failed { path: failed, .. } => assert_eq!(failed, path),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(h.session.is_watching().await);
    assert!(h.reconciler.history(&path).unwrap().is_empty());

    h.session.stop().await.unwrap();
}
