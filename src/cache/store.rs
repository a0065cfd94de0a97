//! Response Cache Module
//!
//! Main cache engine: TTL entries, in-flight fetch deduplication, pattern
//! invalidation and the sweep used by the background task.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::cache::{
    current_timestamp_ms, CacheEntry, CacheStats, InvalidationPattern, DEFAULT_SWEEP_GRACE,
};
use crate::error::{CacheError, Result};

/// Outcome of a producer run, shared by every caller waiting on it.
type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

// == Cache Status ==
/// How a `get_or_fetch` call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh entry
    Hit,
    /// This call started the producer
    Miss,
    /// Joined a fetch another caller had already started
    Shared,
}

impl CacheStatus {
    /// Value used for the `X-Cache-Status` response header.
    pub fn as_header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Shared => "SHARED",
        }
    }
}

// == Fetch Request ==
/// One entry of a [`ResponseCache::fetch_all`] batch.
pub struct FetchRequest<T> {
    pub key: String,
    pub ttl: Duration,
    pub producer: BoxFuture<'static, anyhow::Result<T>>,
}

impl<T> FetchRequest<T> {
    pub fn new<Fut>(key: impl Into<String>, ttl: Duration, producer: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            ttl,
            producer: producer.boxed(),
        }
    }
}

struct PendingFetch<T> {
    /// Registration id, distinguishes this fetch from later ones on the same key
    id: u64,
    future: SharedFetch<T>,
}

struct CacheInner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    pending: HashMap<String, PendingFetch<T>>,
    /// Entries removed to stay under the capacity bound
    evictions: u64,
}

impl<T> CacheInner<T> {
    /// Stores `entry`, making room first when a new key would exceed `max_entries`.
    ///
    /// Expired entries go first. If the cache is still full, the oldest fifth
    /// of the entries (at least one) is evicted by `stored_at`.
    fn insert(&mut self, key: String, entry: CacheEntry<T>, max_entries: Option<usize>) {
        if let Some(max) = max_entries {
            if !self.entries.contains_key(&key) && self.entries.len() >= max {
                self.make_room(max);
            }
        }
        self.entries.insert(key, entry);
    }

    fn make_room(&mut self, max: usize) {
        let now = current_timestamp_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh_at(now));

        if self.entries.len() >= max {
            let batch = (max / 5).max(1);
            let mut by_age: Vec<(u64, String)> = self
                .entries
                .iter()
                .map(|(key, entry)| (entry.stored_at, key.clone()))
                .collect();
            by_age.sort_unstable();
            for (_, key) in by_age.into_iter().take(batch) {
                self.entries.remove(&key);
            }
        }

        let removed = before - self.entries.len();
        self.evictions += removed as u64;
        debug!(removed, max, "Cache full, evicted entries");
    }
}

impl<T: Clone> CacheInner<T> {
    /// Returns fresh data, lazily deleting a stale entry.
    fn read(&mut self, key: &str) -> Option<T> {
        let fresh = self.entries.get(key).map(CacheEntry::is_fresh)?;
        if fresh {
            return self.entries.get(key).map(|entry| entry.data.clone());
        }

        self.entries.remove(key);
        debug!(key, "Removed expired entry on read");
        None
    }
}

// == Response Cache ==
/// Process-wide TTL cache with at-most-one in-flight fetch per key.
///
/// Cloning is cheap and yields a handle to the same storage, so one instance
/// created at startup can be shared by every request handler.
pub struct ResponseCache<T> {
    inner: Arc<Mutex<CacheInner<T>>>,
    next_fetch_id: Arc<AtomicU64>,
    /// Extra time an expired entry survives before the sweep removes it
    grace: Duration,
    /// Upper bound on a single producer run, None = wait forever
    fetch_timeout: Option<Duration>,
    /// Capacity bound on stored entries, None = unbounded
    max_entries: Option<usize>,
}

impl<T> Clone for ResponseCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            next_fetch_id: Arc::clone(&self.next_fetch_id),
            grace: self.grace,
            fetch_timeout: self.fetch_timeout,
            max_entries: self.max_entries,
        }
    }
}

impl<T> Default for ResponseCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponseCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an empty, unbounded cache with the default sweep grace and no
    /// fetch timeout.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                pending: HashMap::new(),
                evictions: 0,
            })),
            next_fetch_id: Arc::new(AtomicU64::new(0)),
            grace: DEFAULT_SWEEP_GRACE,
            fetch_timeout: None,
            max_entries: None,
        }
    }

    /// Caps the number of stored entries. Writing a new key into a full cache
    /// evicts expired entries, then the oldest ones.
    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries.map(|max| max.max(1));
        self
    }

    /// Sets how long past expiry the sweep keeps an entry.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Bounds every producer run. A timed-out fetch fails all of its waiters
    /// and frees the key for a retry.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Creates a cache using the sweep grace, fetch timeout and capacity
    /// from config.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new()
            .with_grace(config.sweep_grace)
            .with_fetch_timeout(config.fetch_timeout)
            .with_max_entries(config.max_entries)
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<T>> {
        lock_inner(&self.inner)
    }

    // == Read ==
    /// Returns the cached value if present and unexpired.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn read(&self, key: &str) -> Option<T> {
        self.lock().read(key)
    }

    // == Write ==
    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    pub fn write(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl);
        self.lock().insert(key.into(), entry, self.max_entries);
    }

    // == Get Or Fetch ==
    /// Returns the cached value for `key`, running `producer` on a miss.
    ///
    /// Concurrent callers for the same key share one producer run and all
    /// observe the same value or the same error. Failures are not cached.
    ///
    /// `producer` is invoked while the cache lock is held; it must only build
    /// the future; touching the cache belongs inside the returned future.
    ///
    /// # Panics
    /// Panics if a miss happens outside a Tokio runtime, because the producer
    /// is spawned onto the current runtime. A panic inside the producer itself
    /// is caught and returned as [`CacheError::Internal`].
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, producer: F, ttl: Duration) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.get_or_fetch_with_status(key, producer, ttl)
            .await
            .map(|(data, _)| data)
    }

    /// Same as [`get_or_fetch`](Self::get_or_fetch), also reporting whether
    /// the value came from the cache, a new fetch or a joined fetch.
    ///
    /// # Panics
    /// Same as [`get_or_fetch`](Self::get_or_fetch): a miss must run inside a
    /// Tokio runtime.
    pub async fn get_or_fetch_with_status<F, Fut>(
        &self,
        key: &str,
        producer: F,
        ttl: Duration,
    ) -> Result<(T, CacheStatus)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        // Read, pending lookup and registration happen under one lock.
        let (fetch, status) = {
            let mut inner = self.lock();

            if let Some(data) = inner.read(key) {
                debug!(key, "Cache hit");
                return Ok((data, CacheStatus::Hit));
            }

            match inner.pending.get(key) {
                Some(pending) => {
                    debug!(key, "Joining in-flight fetch");
                    (pending.future.clone(), CacheStatus::Shared)
                }
                None => {
                    let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.spawn_fetch(key.to_string(), id, producer(), ttl);
                    inner.pending.insert(
                        key.to_string(),
                        PendingFetch {
                            id,
                            future: future.clone(),
                        },
                    );
                    debug!(key, "Cache miss, fetching");
                    (future, CacheStatus::Miss)
                }
            }
        };

        fetch.await.map(|data| (data, status))
    }

    /// Runs the producer in its own task so that a cancelled caller does not
    /// abandon the fetch for everyone else.
    fn spawn_fetch<Fut>(&self, key: String, id: u64, producer: Fut, ttl: Duration) -> SharedFetch<T>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let timeout = self.fetch_timeout;
        let max_entries = self.max_entries;

        let handle = tokio::spawn(async move {
            let guarded = AssertUnwindSafe(producer).catch_unwind();
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(result) => settle(result),
                    Err(_) => {
                        warn!(key = %key, timeout_ms = limit.as_millis() as u64, "Fetch timed out");
                        Err(CacheError::FetchTimeout(key.clone()))
                    }
                },
                None => settle(guarded.await),
            };

            // The registration is dropped before any waiter sees the outcome.
            let mut guard = lock_inner(&inner);
            let registered = guard.pending.get(&key).is_some_and(|p| p.id == id);
            if registered {
                guard.pending.remove(&key);
                if let Ok(data) = &outcome {
                    guard.insert(key.clone(), CacheEntry::new(data.clone(), ttl), max_entries);
                }
            } else {
                debug!(key = %key, "Fetch settled after cache was cleared, result not stored");
            }
            drop(guard);

            if let Err(err) = &outcome {
                warn!(key = %key, error = %err, "Fetch failed, nothing cached");
            }
            outcome
        });

        async move {
            handle.await.unwrap_or_else(|join_err| {
                error!("Fetch task did not complete: {}", join_err);
                Err(CacheError::Internal(format!("fetch task failed: {}", join_err)))
            })
        }
        .boxed()
        .shared()
    }

    // == Fetch All ==
    /// Runs several fetches concurrently.
    ///
    /// Each key maps to `Some(value)` on success or `None` if its producer
    /// failed; failures are logged and do not affect the other keys.
    ///
    /// # Panics
    /// Panics outside a Tokio runtime, like [`get_or_fetch`](Self::get_or_fetch).
    pub async fn fetch_all(&self, requests: Vec<FetchRequest<T>>) -> HashMap<String, Option<T>> {
        let fetches = requests.into_iter().map(|req| async move {
            let FetchRequest { key, ttl, producer } = req;
            let result = self.get_or_fetch(&key, move || producer, ttl).await;
            (key, result)
        });

        join_all(fetches)
            .await
            .into_iter()
            .map(|(key, result)| match result {
                Ok(data) => (key, Some(data)),
                Err(err) => {
                    error!(key = %key, "Query failed: {}", err);
                    (key, None)
                }
            })
            .collect()
    }

    // == Invalidate ==
    /// Removes every existing entry whose key matches `pattern`.
    ///
    /// Returns the number of removed entries. In-flight fetches are untouched.
    pub fn invalidate(&self, pattern: impl Into<InvalidationPattern>) -> usize {
        let pattern = pattern.into();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !pattern.matches(key));
        let removed = before - inner.entries.len();

        debug!(pattern = %pattern, removed, "Invalidated cache entries");
        removed
    }

    // == Clear ==
    /// Drops all entries and all pending fetch registrations.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.pending.clear();
    }

    // == Sweep Expired ==
    /// Removes entries that expired more than the grace period ago.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let grace = self.grace;
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| !entry.is_past_grace_at(now, grace));
        before - inner.entries.len()
    }

    // == Stats ==
    /// Returns a snapshot of the cache without evicting anything.
    pub fn stats(&self) -> CacheStats {
        let now = current_timestamp_ms();
        let inner = self.lock();
        let mut stats = CacheStats::new();
        for entry in inner.entries.values() {
            stats.record_entry(entry.is_fresh_at(now));
        }
        stats.set_pending(inner.pending.len());
        stats.set_evictions(inner.evictions);
        stats
    }

    // == Length ==
    /// Returns the number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Sweep grace configured for this cache.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Capacity bound configured for this cache.
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }
}

fn lock_inner<T>(inner: &Mutex<CacheInner<T>>) -> MutexGuard<'_, CacheInner<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps a producer run, including a panic, to a cache result.
fn settle<T>(
    result: std::result::Result<anyhow::Result<T>, Box<dyn std::any::Any + Send>>,
) -> Result<T> {
    match result {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(err)) => Err(CacheError::producer(err)),
        Err(_) => Err(CacheError::Internal("producer panicked".to_string())),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;
    use tokio::sync::oneshot;

    const LONG_TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_cache_new() {
        let cache: ResponseCache<Value> = ResponseCache::new();
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.grace(), DEFAULT_SWEEP_GRACE);
    }

    #[test]
    fn test_write_and_read() {
        let cache = ResponseCache::new();
        cache.write("k1", json!({"count": 1}), LONG_TTL);

        assert_eq!(cache.read("k1"), Some(json!({"count": 1})));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_read_missing() {
        let cache: ResponseCache<Value> = ResponseCache::new();
        assert_eq!(cache.read("missing"), None);
    }

    #[test]
    fn test_zero_ttl_is_a_miss() {
        let cache = ResponseCache::new();
        cache.write("k", 1u32, Duration::ZERO);

        assert_eq!(cache.read("k"), None);
        // Lazily deleted on that read
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_overwrite() {
        let cache = ResponseCache::new();
        cache.write("k", 1u32, LONG_TTL);
        cache.write("k", 2u32, LONG_TTL);

        assert_eq!(cache.read("k"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_needs_no_runtime() {
        let cache = ResponseCache::new();
        cache.write("k", 7u32, LONG_TTL);

        let value = futures::executor::block_on(cache.get_or_fetch(
            "k",
            || async { Ok::<u32, anyhow::Error>(0) },
            LONG_TTL,
        ));
        assert_eq!(value.unwrap(), 7);
    }

    #[test]
    #[should_panic]
    fn test_miss_outside_runtime_panics() {
        let cache: ResponseCache<u32> = ResponseCache::new();
        let _ = futures::executor::block_on(cache.get_or_fetch(
            "k",
            || async { Ok::<u32, anyhow::Error>(0) },
            LONG_TTL,
        ));
    }

    #[test]
    fn test_from_config_applies_capacity() {
        let config = crate::config::Config::default();
        let cache: ResponseCache<Value> = ResponseCache::from_config(&config);
        assert_eq!(cache.max_entries(), Some(1000));
        assert_eq!(ResponseCache::<Value>::new().max_entries(), None);
    }

    #[test]
    fn test_capacity_bound_evicts_oldest() {
        let cache = ResponseCache::new().with_max_entries(Some(5));
        for i in 0..5u32 {
            cache.write(format!("k{}", i), i, LONG_TTL);
            sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.len(), 5);

        cache.write("k5", 5, LONG_TTL);

        assert_eq!(cache.len(), 5);
        assert_eq!(cache.read("k0"), None);
        assert_eq!(cache.read("k1"), Some(1));
        assert_eq!(cache.read("k5"), Some(5));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_capacity_bound_drops_expired_first() {
        let cache = ResponseCache::new().with_max_entries(Some(3));
        cache.write("old", 0u32, LONG_TTL);
        sleep(Duration::from_millis(2));
        cache.write("stale", 1, Duration::ZERO);
        cache.write("fresh", 2, LONG_TTL);

        cache.write("new", 3, LONG_TTL);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.read("old"), Some(0));
        assert_eq!(cache.read("new"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_capacity_bound_allows_overwrite_when_full() {
        let cache = ResponseCache::new().with_max_entries(Some(2));
        cache.write("a", 1u32, LONG_TTL);
        cache.write("b", 2, LONG_TTL);
        cache.write("a", 10, LONG_TTL);

        assert_eq!(cache.read("a"), Some(10));
        assert_eq!(cache.read("b"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_fetched_results_respect_capacity() {
        let cache = ResponseCache::new().with_max_entries(Some(10));
        for i in 0..25u32 {
            let key = format!("k{}", i);
            let value = cache
                .get_or_fetch(&key, move || async move { Ok::<u32, anyhow::Error>(i) }, LONG_TTL)
                .await
                .unwrap();
            assert_eq!(value, i);
        }

        assert!(cache.len() <= 10);
        assert!(cache.stats().evictions >= 15);
    }

    #[test]
    fn test_invalidate_scoping() {
        let cache = ResponseCache::new();
        cache.write("api:deadlines:user:A", 1u32, LONG_TTL);
        cache.write("api:deadlines:user:B", 2u32, LONG_TTL);

        let removed = cache.invalidate("user:A");

        assert_eq!(removed, 1);
        assert_eq!(cache.read("api:deadlines:user:A"), None);
        assert_eq!(cache.read("api:deadlines:user:B"), Some(2));
    }

    #[test]
    fn test_invalidate_no_match_is_noop() {
        let cache = ResponseCache::new();
        cache.write("api:stats", 1u32, LONG_TTL);

        assert_eq!(cache.invalidate("user:Z"), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_regex() {
        let cache = ResponseCache::new();
        cache.write("api:deadlines:user:A", 1u32, LONG_TTL);
        cache.write("api:bookmarks:user:A", 2u32, LONG_TTL);
        cache.write("api:schools", 3u32, LONG_TTL);

        let re = regex::Regex::new(r":user:A$").unwrap();
        assert_eq!(cache.invalidate(re), 2);
        assert_eq!(cache.read("api:schools"), Some(3));
    }

    #[test]
    fn test_stats_does_not_evict() {
        let cache = ResponseCache::new();
        cache.write("fresh", 1u32, LONG_TTL);
        cache.write("stale", 2u32, Duration::ZERO);

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.valid_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.pending_count, 0);

        // Still two entries after computing stats
        assert_eq!(cache.stats().total_entries, 2);
    }

    #[test]
    fn test_sweep_respects_grace() {
        let cache = ResponseCache::new().with_grace(Duration::from_millis(10));
        cache.write("stale", 1u32, Duration::from_millis(1));
        cache.write("fresh", 2u32, LONG_TTL);

        sleep(Duration::from_millis(30));

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.read("fresh"), Some(2));
    }

    #[test]
    fn test_sweep_keeps_recently_expired_entries() {
        let cache = ResponseCache::new();
        cache.write("stale", 1u32, Duration::ZERO);

        // Default grace is five minutes
        assert_eq!(cache.sweep_expired(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_hit_skips_producer() {
        let cache = ResponseCache::new();
        cache.write("k", 7u32, LONG_TTL);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let (value, status) = cache
            .get_or_fetch_with_status(
                "k",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                },
                LONG_TTL,
            )
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_miss_stores_result() {
        let cache = ResponseCache::new();

        let (value, status) = cache
            .get_or_fetch_with_status("k", || async { Ok(3u32) }, LONG_TTL)
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(cache.read("k"), Some(3));
        assert_eq!(cache.stats().pending_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = ResponseCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let counter = calls.clone();
        let first = cache.get_or_fetch_with_status(
            "k",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, anyhow::Error>(rx.await?)
            },
            LONG_TTL,
        );

        let counter = calls.clone();
        let second = cache.get_or_fetch_with_status(
            "k",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            },
            LONG_TTL,
        );

        let release = async {
            tokio::task::yield_now().await;
            assert_eq!(cache.stats().pending_count, 1);
            tx.send(42).unwrap();
        };

        let (a, b, _) = tokio::join!(first, second, release);

        assert_eq!(a.unwrap(), (42, CacheStatus::Miss));
        assert_eq!(b.unwrap(), (42, CacheStatus::Shared));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_fans_out_and_is_not_cached() {
        let cache: ResponseCache<u32> = ResponseCache::new();
        let (tx, rx) = oneshot::channel::<()>();

        let first = cache.get_or_fetch(
            "k",
            move || async move {
                rx.await?;
                Err::<u32, _>(anyhow::anyhow!("database error: connection reset"))
            },
            LONG_TTL,
        );
        let second = cache.get_or_fetch("k", || async { Ok(1) }, LONG_TTL);
        let release = async {
            tokio::task::yield_now().await;
            tx.send(()).unwrap();
        };

        let (a, b, _) = tokio::join!(first, second, release);

        match (a, b) {
            (Err(CacheError::ProducerFailure(x)), Err(CacheError::ProducerFailure(y))) => {
                assert!(Arc::ptr_eq(&x, &y), "waiters should observe the same error");
            }
            other => panic!("expected shared producer failure, got {:?}", other),
        }

        assert_eq!(cache.read("k"), None);
        assert_eq!(cache.stats().pending_count, 0);

        // Key is not poisoned
        let value = cache.get_or_fetch("k", || async { Ok(5) }, LONG_TTL).await;
        assert_eq!(value.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_producer_panic_frees_key() {
        let cache: ResponseCache<u32> = ResponseCache::new();

        let result = cache
            .get_or_fetch(
                "k",
                || async {
                    if true {
                        panic!("producer bug");
                    }
                    Ok::<u32, anyhow::Error>(0)
                },
                LONG_TTL,
            )
            .await;
        assert!(matches!(result, Err(CacheError::Internal(_))));
        assert_eq!(cache.stats().pending_count, 0);

        let value = cache.get_or_fetch("k", || async { Ok(9) }, LONG_TTL).await;
        assert_eq!(value.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_fetch_timeout_frees_key() {
        let cache: ResponseCache<u32> =
            ResponseCache::new().with_fetch_timeout(Some(Duration::from_millis(20)));

        let result = cache
            .get_or_fetch("k", || std::future::pending::<anyhow::Result<u32>>(), LONG_TTL)
            .await;
        assert!(matches!(result, Err(CacheError::FetchTimeout(_))));
        assert_eq!(cache.stats().pending_count, 0);

        let value = cache.get_or_fetch("k", || async { Ok(1) }, LONG_TTL).await;
        assert_eq!(value.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_abort_fetch() {
        let cache: ResponseCache<u32> = ResponseCache::new();
        let (tx, rx) = oneshot::channel::<u32>();

        let abandoned = cache.get_or_fetch(
            "k",
            move || async move { Ok::<u32, anyhow::Error>(rx.await?) },
            LONG_TTL,
        );
        let timed_out = tokio::time::timeout(Duration::from_millis(10), abandoned).await;
        assert!(timed_out.is_err());

        tx.send(11).unwrap();
        let value = cache.get_or_fetch("k", || async { Ok(0) }, LONG_TTL).await;
        assert_eq!(value.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_clear_drops_pending_and_ignores_late_result() {
        let cache: ResponseCache<u32> = ResponseCache::new();
        let (tx, rx) = oneshot::channel::<u32>();

        let waiting = cache.get_or_fetch(
            "k",
            move || async move { Ok::<u32, anyhow::Error>(rx.await?) },
            LONG_TTL,
        );
        let reset = async {
            tokio::task::yield_now().await;
            cache.clear();
            assert_eq!(cache.stats().pending_count, 0);
            tx.send(4).unwrap();
        };

        let (value, _) = tokio::join!(waiting, reset);

        // The original waiter still gets its value, the cleared cache stays empty.
        assert_eq!(value.unwrap(), 4);
        assert_eq!(cache.read("k"), None);
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let cache: ResponseCache<u32> = ResponseCache::new();

        let results = cache
            .fetch_all(vec![
                FetchRequest::new("a", LONG_TTL, async { Ok(1) }),
                FetchRequest::new("b", LONG_TTL, async { Err::<u32, _>(anyhow::anyhow!("boom")) }),
            ])
            .await;

        assert_eq!(results.get("a"), Some(&Some(1)));
        assert_eq!(results.get("b"), Some(&None));
        assert_eq!(cache.read("a"), Some(1));
        assert_eq!(cache.read("b"), None);
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let cache = ResponseCache::new();

        cache.write("k1", json!({"count": 1}), LONG_TTL);
        assert_eq!(cache.read("k1"), Some(json!({"count": 1})));

        cache.invalidate("k1");
        assert_eq!(cache.read("k1"), None);

        let fetched = cache
            .get_or_fetch("k1", || async { Ok(json!({"count": 2})) }, LONG_TTL)
            .await
            .unwrap();
        assert_eq!(fetched, json!({"count": 2}));

        let cached = cache
            .get_or_fetch(
                "k1",
                || async { Err::<Value, _>(anyhow::anyhow!("producer must not run")) },
                LONG_TTL,
            )
            .await
            .unwrap();
        assert_eq!(cached, json!({"count": 2}));
    }
}
