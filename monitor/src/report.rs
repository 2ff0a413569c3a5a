//! Human-readable output for decisions, watch events and history listings.

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::session::WatchEvent;
use crate::types::{Decision, FileHistory, HistoryEntry};

/// Printed when a path has no recorded history.
pub const NO_HISTORY: &str = "No hash history found.";

/// Formats a timestamp for display, to the second.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One line describing what a reconciliation did.
#[must_use]
pub fn describe_decision(decision: Decision, entry: &HistoryEntry) -> String {
    let ts = format_timestamp(&entry.observed_at);
    match decision {
        Decision::AddedInitial => format!("[{ts}] Initial hash stored: {}", entry.digest),
        Decision::AddedChanged => format!("[{ts}] File changed! New hash recorded: {}", entry.digest),
        Decision::Refreshed => format!("[{ts}] No change detected."),
    }
}

/// One line describing a watch loop event.
#[must_use]
pub fn describe_event(event: &WatchEvent) -> String {
    match event {
        WatchEvent::Observed {
            decision, entry, ..
        } => describe_decision(*decision, entry),
        WatchEvent::Failed { message, .. } => format!("Error reading file: {message}"),
        WatchEvent::Halted { path, message } => format!(
            "Stopped watching {}: {message}. Repair or remove the record to resume.",
            path.display()
        ),
    }
}

/// Lists a history oldest first as `index. digest  (timestamp)`.
#[must_use]
pub fn format_history(history: &FileHistory) -> String {
    if history.is_empty() {
        return NO_HISTORY.to_string();
    }

    let mut out = String::from("Hash history:");
    for (index, entry) in history.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. {}  ({})",
            index + 1,
            entry.digest,
            format_timestamp(&entry.observed_at)
        );
    }
    out
}
