//! Cache Statistics Module
//!
//! Diagnostic snapshot of the cache contents.

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time view of the cache. Computing it never evicts anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Entries currently held, fresh or not
    pub total_entries: usize,
    /// In-flight producer fetches
    pub pending_count: usize,
    /// Entries that would be served by a read
    pub valid_entries: usize,
    /// Entries waiting for lazy deletion or the sweep
    pub expired_entries: usize,
    /// Entries removed so far to respect the capacity bound
    pub evictions: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Entry ==
    /// Counts one entry as valid or expired.
    pub fn record_entry(&mut self, fresh: bool) {
        self.total_entries += 1;
        if fresh {
            self.valid_entries += 1;
        } else {
            self.expired_entries += 1;
        }
    }

    // == Set Pending ==
    pub fn set_pending(&mut self, count: usize) {
        self.pending_count = count;
    }

    // == Set Evictions ==
    pub fn set_evictions(&mut self, count: u64) {
        self.evictions = count;
    }
}
