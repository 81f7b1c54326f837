//! Service statistics with atomic counters.
//!
//! [`ServiceStats`] is shared by the watch service, its keys, and the scan
//! tasks of the polling backend. Counters use
//! [`Relaxed`](std::sync::atomic::Ordering::Relaxed) ordering: they are for
//! display and diagnostics and never drive control flow.
//!
//! # Examples
//!
//! ```
//! use pw_watcher::ServiceStats;
//!
//! let stats = ServiceStats::new();
//! stats.record_scan();
//! stats.record_event();
//!
//! let snap = stats.snapshot();
//! assert_eq!(snap.scans_completed, 1);
//! assert_eq!(snap.events_signalled, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters describing what the service has done so far.
#[derive(Debug, Default)]
pub struct ServiceStats {
    /// Directory scans that completed.
    scans_completed: AtomicU64,
    /// Directory scans that failed to open the directory.
    scans_failed: AtomicU64,
    /// Entries whose attributes could not be read during a scan.
    entries_skipped: AtomicU64,
    /// Events appended to a key (coalesced repeats excluded).
    events_signalled: AtomicU64,
    /// Times a key's pending list collapsed into an overflow event.
    overflows: AtomicU64,
}

impl ServiceStats {
    /// Creates a new [`ServiceStats`] with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed scan.
    #[inline]
    pub fn record_scan(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a scan that could not open its directory.
    #[inline]
    pub fn record_scan_failure(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records entries skipped because their attributes were unreadable.
    #[inline]
    pub fn record_skipped(&self, count: usize) {
        self.entries_skipped
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a new pending event.
    #[inline]
    pub fn record_event(&self) {
        self.events_signalled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an overflow.
    #[inline]
    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            events_signalled: self.events_signalled.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`ServiceStats`].
///
/// Safe to store, serialize, and send between threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Directory scans that completed.
    pub scans_completed: u64,
    /// Directory scans that failed to open the directory.
    pub scans_failed: u64,
    /// Entries whose attributes could not be read during a scan.
    pub entries_skipped: u64,
    /// Events appended to a key.
    pub events_signalled: u64,
    /// Times a key's pending list collapsed into an overflow event.
    pub overflows: u64,
}

impl StatsSnapshot {
    /// Returns the total number of scan attempts.
    #[inline]
    #[must_use]
    pub const fn scans_attempted(&self) -> u64 {
        self.scans_completed + self.scans_failed
    }
}
