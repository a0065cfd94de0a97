//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::time::Duration;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// TTL for per-user lists that change often (deadlines, bookmarks)
    pub user_list_ttl: Duration,
    /// TTL for reference data that rarely changes (schools)
    pub reference_ttl: Duration,
    /// Interval between background sweeps
    pub sweep_interval: Duration,
    /// How long past expiry the sweep keeps an entry
    pub sweep_grace: Duration,
    /// Upper bound on a producer run, None = no timeout
    pub fetch_timeout: Option<Duration>,
    /// Maximum number of cached entries, None = unbounded
    pub max_entries: Option<usize>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `USER_LIST_TTL_MS` - Per-user list TTL in milliseconds (default: 120000)
    /// - `REFERENCE_TTL_MS` - Reference data TTL in milliseconds (default: 1800000)
    /// - `SWEEP_INTERVAL_SECS` - Sweep frequency in seconds (default: 300)
    /// - `SWEEP_GRACE_SECS` - Sweep grace period in seconds (default: 300)
    /// - `FETCH_TIMEOUT_MS` - Producer timeout in milliseconds (default: unset)
    /// - `MAX_ENTRIES` - Maximum cache entries, 0 = unbounded (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            user_list_ttl: parse_var("USER_LIST_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.user_list_ttl),
            reference_ttl: parse_var("REFERENCE_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reference_ttl),
            sweep_interval: parse_var("SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            sweep_grace: parse_var("SWEEP_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_grace),
            fetch_timeout: parse_var("FETCH_TIMEOUT_MS").map(Duration::from_millis),
            max_entries: match parse_var::<usize>("MAX_ENTRIES") {
                Some(0) => None,
                Some(max) => Some(max),
                None => defaults.max_entries,
            },
        }
    }
}

fn parse_var<V: std::str::FromStr>(name: &str) -> Option<V> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            user_list_ttl: Duration::from_secs(2 * 60),
            reference_ttl: Duration::from_secs(30 * 60),
            sweep_interval: crate::cache::DEFAULT_SWEEP_INTERVAL,
            sweep_grace: crate::cache::DEFAULT_SWEEP_GRACE,
            fetch_timeout: None,
            max_entries: Some(crate::cache::DEFAULT_MAX_ENTRIES),
        }
    }
}
