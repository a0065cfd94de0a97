//! Response Cache - In-memory API response caching
//!
//! TTL-bounded cache for JSON API responses with deduplication of concurrent
//! fetches, pattern-based invalidation and a periodic expiry sweep.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{build_key, CacheStats, CacheStatus, InvalidationPattern, ResponseCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_sweep_task;
