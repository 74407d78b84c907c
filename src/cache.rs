use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;

/// Cached value plus its absolute expiry.
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Bounded key/value store with least-recently-used eviction and a sliding
/// per-entry time-to-live.
///
/// Reads and writes both count as a use. Expired entries are removed by the
/// read that discovers them; there is no background sweep. A single mutex
/// serializes all access so recency order stays exact under concurrency.
///
/// Values are returned by clone. `Option<T>` values are fine: a cached `None`
/// comes back as `Some(None)`, which is a hit.
pub struct Cache<K, V> {
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> Cache<K, V> {
    pub fn new(ttl: Duration, item_limit: NonZeroUsize) -> Self {
        Cache {
            entries: Mutex::new(LruCache::new(item_limit)),
            ttl,
        }
    }

    /// Look up a live entry, refreshing its TTL and recency on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Insert or overwrite an entry with a fresh TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_at(key, value, Instant::now());
    }

    pub(crate) fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            entries.pop(key);
            debug!("[CACHE] Entry expired on read");
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.expires_at = now + self.ttl;
        Some(entry.value.clone())
    }

    pub(crate) fn set_at(&self, key: K, value: V, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = CacheEntry {
            value,
            expires_at: now + self.ttl,
        };
        let replaced_existing = entries.contains(&key);
        if entries.push(key, entry).is_some() && !replaced_existing {
            debug!("[CACHE] Evicted least recently used entry");
        }
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cap()
            .get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
