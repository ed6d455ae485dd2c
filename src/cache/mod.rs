//! In-process TTL cache backed by moka
//!
//! Each cache instance owns its capacity and TTL, and is injected where it is
//! needed (the orchestrator keeps one for balanced snapshots):
//!
//! - Entries expire after their own TTL and are never served afterwards
//! - Size-bounded eviction (TinyLFU admission, LRU window)
//! - Hit/miss accounting lives in the wrapper; evictions and expirations are
//!   counted by moka's eviction listener once pending tasks run
//!
//! # Example
//!
//! ```rust
//! use feedmix::cache::TtlCache;
//! use std::time::Duration;
//!
//! let cache: TtlCache<String, Vec<u32>> = TtlCache::new(128, Duration::from_secs(300));
//! cache.insert("latest".to_string(), vec![1, 2, 3]);
//! assert_eq!(cache.get(&"latest".to_string()), Some(vec![1, 2, 3]));
//! assert_eq!(cache.stats().hits, 1);
//! ```

use moka::notification::RemovalCause;
use moka::sync::Cache;
use moka::Expiry;
use sha2::{Digest, Sha256};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses (including expired entries)
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their TTL passed
    pub expirations: u64,
    /// Live entry count at snapshot time
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A cached value with its TTL and hit counter
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub ttl: Duration,
    hits: AtomicU64,
}

impl<V> CacheEntry<V> {
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Expires each entry after the TTL it was inserted with
struct EntryTtl;

impl<K, V> Expiry<K, Arc<CacheEntry<V>>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &Arc<CacheEntry<V>>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &Arc<CacheEntry<V>>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Debug, Default)]
struct RemovalCounters {
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Generic key-value cache with per-entry TTL and bounded size
pub struct TtlCache<K, V> {
    inner: Cache<K, Arc<CacheEntry<V>>>,
    capacity: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    removals: Arc<RemovalCounters>,
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        let removals = Arc::new(RemovalCounters::default());
        let counters = Arc::clone(&removals);

        let inner = Cache::builder()
            .max_capacity(capacity as u64)
            .expire_after(EntryTtl)
            .eviction_listener(move |_key, _value, cause| match cause {
                RemovalCause::Expired => {
                    counters.expirations.fetch_add(1, Ordering::Relaxed);
                }
                RemovalCause::Size => {
                    counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            })
            .build();

        Self {
            inner,
            capacity,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            removals,
        }
    }

    /// Get a live value, counting a hit or a miss
    pub fn get(&self, key: &K) -> Option<V> {
        match self.inner.get(key) {
            Some(entry) => {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup(true);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup(false);
                None
            }
        }
    }

    /// Insert with the cache's default TTL
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.inner.insert(
            key,
            Arc::new(CacheEntry {
                value,
                ttl,
                hits: AtomicU64::new(0),
            }),
        );
    }

    /// Return the cached value or compute, store and return it
    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    /// Remove one entry. Returns whether a live entry was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    /// Run pending maintenance and return how many entries expired
    pub fn purge_expired(&self) -> usize {
        let before = self.removals.expirations.load(Ordering::Relaxed);
        self.inner.run_pending_tasks();
        (self.removals.expirations.load(Ordering::Relaxed) - before) as usize
    }

    /// Hit counter of a live entry
    pub fn entry_hits(&self, key: &K) -> Option<u64> {
        self.inner.get(key).map(|e| e.hit_count())
    }

    /// Number of live entries after pending maintenance
    pub fn len(&self) -> usize {
        self.inner.run_pending_tasks();
        self.inner.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.removals.evictions.load(Ordering::Relaxed),
            expirations: self.removals.expirations.load(Ordering::Relaxed),
            entries,
            capacity: self.capacity,
        }
    }
}

/// Hash key parts into a stable cache key
pub fn hash_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> TtlCache<String, u32> {
        TtlCache::new(capacity, Duration::from_secs(60))
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.hits = 75;
        stats.misses = 25;
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_get_and_miss_accounting() {
        let cache = cache(4);
        assert_eq!(cache.get(&"a".to_string()), None);

        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(cache.entry_hits(&"a".to_string()), Some(2));
    }

    #[test]
    fn test_size_bound_holds() {
        let cache = cache(2);
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            cache.insert(key.to_string(), i as u32);
        }

        assert!(cache.len() <= 2);
        let stats = cache.stats();
        assert!(stats.entries <= stats.capacity);
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let cache = cache(1);
        cache.insert("a".to_string(), 1);
        cache.insert("a".to_string(), 2);
        assert_eq!(cache.get(&"a".to_string()), Some(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = cache(4);
        cache.insert_with_ttl("short".to_string(), 1, Duration::from_millis(50));
        cache.insert("long".to_string(), 2);

        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(cache.get(&"short".to_string()), None);
        assert_eq!(cache.get(&"long".to_string()), Some(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_get_or_insert_with() {
        let cache = cache(4);
        let mut calls = 0;
        let v = cache.get_or_insert_with("k".to_string(), || {
            calls += 1;
            7
        });
        assert_eq!(v, 7);
        let v = cache.get_or_insert_with("k".to_string(), || {
            calls += 1;
            8
        });
        assert_eq!(v, 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = cache(4);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert!(cache.invalidate(&"a".to_string()));
        assert!(!cache.invalidate(&"a".to_string()));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hash_key() {
        let h1 = hash_key(&["limit=10", "max=3"]);
        let h2 = hash_key(&["limit=10", "max=3"]);
        let h3 = hash_key(&["limit=10m", "ax=3"]);

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 64);
    }
}
