//! Engine-wide parse counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    parses: AtomicU64,
    stale_discards: AtomicU64,
    io_failures: AtomicU64,
    parse_failures: AtomicU64,
    cascade_reparses: AtomicU64,
}

impl StatCounters {
    pub fn parsed(&self) {
        self.parses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_discard(&self) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn io_failure(&self) {
        self.io_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cascades(&self, count: usize) {
        self.cascade_reparses
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ParseStats {
        ParseStats {
            parses: self.parses.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            io_failures: self.io_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            cascade_reparses: self.cascade_reparses.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the engine's parse counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Parse results published
    pub parses: u64,
    /// Results thrown away because the file changed during the parse
    pub stale_discards: u64,
    /// Files that could not be read
    pub io_failures: u64,
    /// Files the front end rejected
    pub parse_failures: u64,
    /// Translation units rescheduled because an included file changed state
    pub cascade_reparses: u64,
}
