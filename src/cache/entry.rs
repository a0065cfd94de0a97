//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// == Cache Entry ==
/// A stored response together with its validity window.
///
/// Entries are never mutated after creation; a refresh replaces the whole entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached response data
    pub data: T,
    /// Write timestamp (Unix milliseconds)
    pub stored_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates an entry stored now that expires after `ttl`.
    ///
    /// A zero `ttl` yields an entry that is already stale.
    pub fn new(data: T, ttl: Duration) -> Self {
        let now = current_timestamp_ms();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        Self {
            data,
            stored_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    // == Is Fresh ==
    /// Returns true while `now < expires_at`.
    pub fn is_fresh_at(&self, now: u64) -> bool {
        now < self.expires_at
    }

    /// Checks freshness against the current clock.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(current_timestamp_ms())
    }

    // == Past Grace ==
    /// Returns true once the entry has been expired for longer than `grace`.
    ///
    /// Used by the background sweep, which leaves recently expired entries
    /// to lazy deletion on read.
    pub fn is_past_grace_at(&self, now: u64, grace: Duration) -> bool {
        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        now > self.expires_at.saturating_add(grace_ms)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
