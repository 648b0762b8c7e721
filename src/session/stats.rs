//! Anomaly counters for a session.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated by the read loop.
#[derive(Debug, Default)]
pub struct SessionStats {
    lines_received: AtomicU64,
    replies_matched: AtomicU64,
    unmatched_replies: AtomicU64,
    status_broadcasts: AtomicU64,
    unrecognized_lines: AtomicU64,
    dropped_broadcasts: AtomicU64,
    dropped_diagnostics: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Complete lines framed from the connection.
    pub lines_received: u64,
    /// Replies that completed an outstanding command.
    pub replies_matched: u64,
    /// Replies for ids that were never sent, already answered or abandoned.
    pub unmatched_replies: u64,
    /// Status lines seen.
    pub status_broadcasts: u64,
    /// Lines that were neither replies nor status.
    pub unrecognized_lines: u64,
    /// Broadcast deliveries skipped because a subscriber queue was full.
    pub dropped_broadcasts: u64,
    /// Unrecognized lines skipped because the diagnostic queue was full.
    pub dropped_diagnostics: u64,
}

impl StatsSnapshot {
    /// Total of all anomaly counters.
    pub fn anomalies(&self) -> u64 {
        self.unmatched_replies
            + self.unrecognized_lines
            + self.dropped_broadcasts
            + self.dropped_diagnostics
    }
}

impl SessionStats {
    pub(crate) fn line_received(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reply(&self, matched: bool) {
        let counter = if matched {
            &self.replies_matched
        } else {
            &self.unmatched_replies
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn status(&self, dropped: u64) {
        self.status_broadcasts.fetch_add(1, Ordering::Relaxed);
        if dropped > 0 {
            self.dropped_broadcasts.fetch_add(dropped, Ordering::Relaxed);
        }
    }

    pub(crate) fn unrecognized(&self, delivered: bool) {
        self.unrecognized_lines.fetch_add(1, Ordering::Relaxed);
        if !delivered {
            self.dropped_diagnostics.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            replies_matched: self.replies_matched.load(Ordering::Relaxed),
            unmatched_replies: self.unmatched_replies.load(Ordering::Relaxed),
            status_broadcasts: self.status_broadcasts.load(Ordering::Relaxed),
            unrecognized_lines: self.unrecognized_lines.load(Ordering::Relaxed),
            dropped_broadcasts: self.dropped_broadcasts.load(Ordering::Relaxed),
            dropped_diagnostics: self.dropped_diagnostics.load(Ordering::Relaxed),
        }
    }
}
