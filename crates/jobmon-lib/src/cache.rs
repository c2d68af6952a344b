//! Size- and TTL-bounded cache for live metric data
//!
//! Entries carry a caller supplied weight (an estimate of their size in
//! bytes) and an expiry instant. Total resident weight never exceeds the
//! configured capacity: inserting evicts least-recently-used entries until
//! the new entry fits. Expired entries read as misses and are removed
//! lazily on access.

use lru::LruCache;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default cache capacity (500 MiB)
pub const DEFAULT_CAPACITY_BYTES: usize = 500 * 1024 * 1024;

/// Default TTL for data fetched from live backends
pub const DEFAULT_LIVE_TTL: Duration = Duration::from_secs(2 * 60);

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    weight: usize,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    used: usize,
    evictions: u64,
}

/// Outcome of a `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// Whether the value was stored
    pub stored: bool,
    /// Entries evicted to make room
    pub evicted: usize,
}

/// Point-in-time view of cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: usize,
    pub capacity_bytes: usize,
    pub evictions: u64,
}

/// Thread-safe weighted LRU cache with per-entry TTL
///
/// Values are cloned out on `get`, so store cheap handles (`Arc<T>`) for
/// large payloads. Concurrent misses for the same key are not coalesced.
pub struct WeightedCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

impl<K: Hash + Eq, V: Clone> WeightedCache<K, V> {
    /// Create a cache holding at most `capacity` units of weight
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                used: 0,
                evictions: 0,
            }),
            capacity,
        }
    }

    /// Look up a live entry, refreshing its recency
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            if let Some(entry) = inner.entries.pop(key) {
                inner.used -= entry.weight;
            }
        }
        None
    }

    /// Insert or replace an entry that expires after `ttl`
    ///
    /// An entry heavier than the whole capacity is not stored.
    pub fn put(&self, key: K, value: V, weight: usize, ttl: Duration) -> PutOutcome {
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.pop(&key) {
            inner.used -= old.weight;
        }

        if weight > self.capacity {
            debug!(weight, capacity = self.capacity, "Cache entry exceeds capacity, not stored");
            return PutOutcome {
                stored: false,
                evicted: 0,
            };
        }

        let mut evicted = 0;
        while inner.used + weight > self.capacity {
            match inner.entries.pop_lru() {
                Some((_, entry)) => {
                    inner.used -= entry.weight;
                    evicted += 1;
                }
                None => break,
            }
        }
        inner.evictions += evicted as u64;

        inner.entries.put(
            key,
            CacheEntry {
                value,
                weight,
                expires_at: Instant::now() + ttl,
            },
        );
        inner.used += weight;

        PutOutcome {
            stored: true,
            evicted,
        }
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .count();
        if expired == 0 {
            return 0;
        }

        // LruCache has no retain; rebuild from the live entries, oldest first
        let mut live = Vec::with_capacity(inner.entries.len() - expired);
        while let Some((k, e)) = inner.entries.pop_lru() {
            if e.is_expired(now) {
                inner.used -= e.weight;
            } else {
                live.push((k, e));
            }
        }
        for (k, e) in live {
            inner.entries.put(k, e);
        }
        expired
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            used_bytes: inner.used,
            capacity_bytes: self.capacity,
            evictions: inner.evictions,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
