//! Cache Module
//!
//! Provides an in-memory response cache with TTL expiry, deduplication of
//! concurrent fetches and pattern-based invalidation.

mod entry;
mod key;
mod pattern;
mod stats;
mod store;


use std::time::Duration;

// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use key::{build_key, encode_segment, KEY_PREFIX};
pub use pattern::{owner_pattern, InvalidationPattern};
pub use stats::CacheStats;
pub use store::{CacheStatus, FetchRequest, ResponseCache};

// == Public Constants ==
/// How long past expiry the background sweep leaves an entry alone
pub const DEFAULT_SWEEP_GRACE: Duration = Duration::from_secs(5 * 60);

/// Interval between background sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Capacity bound applied by the server unless configured otherwise
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
