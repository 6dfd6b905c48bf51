//! TTL key cache
//!
//! Bounded map of key material with a per-cache lifetime. Expired entries are
//! dropped lazily on access; when full, the least recently accessed entry is
//! evicted to make room.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    created_at: Instant,
    last_access: Instant,
}

/// Counters exposed by [`TtlCache::stats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Thread-safe cache with time-to-live and LRU eviction
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Live value for `key`, refreshing its access time
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.created_at) < self.ttl => {
                entry.last_access = now;
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
        }
        inner.misses += 1;
        None
    }

    /// Insert or replace `key`
    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) {
            self.make_room(&mut inner, now);
        }
        inner.entries.insert(
            key,
            Entry {
                value,
                created_at: now,
                last_access: now,
            },
        );
    }

    /// Insert unless a live entry exists; returns whichever value is cached.
    ///
    /// Two callers racing to populate the same key both end up with the
    /// first writer's value.
    pub fn insert_if_absent(&self, key: K, value: V) -> V {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(entry) = inner.entries.get_mut(&key) {
            if now.duration_since(entry.created_at) < self.ttl {
                entry.last_access = now;
                return entry.value.clone();
            }
        }
        inner.entries.remove(&key);

        self.make_room(inner, now);
        inner.entries.insert(
            key,
            Entry {
                value: value.clone(),
                created_at: now,
                last_access: now,
            },
        );
        value
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.remove(key).map(|e| e.value)
    }

    /// Live entries (expired ones are purged first)
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.purge_expired(&mut inner, now);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.purge_expired(&mut inner, now);
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity,
            ttl_secs: self.ttl.as_secs(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    fn purge_expired(&self, inner: &mut Inner<K, V>, now: Instant) {
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.created_at) < ttl);
    }

    fn make_room(&self, inner: &mut Inner<K, V>, now: Instant) {
        if inner.entries.len() < self.capacity {
            return;
        }
        self.purge_expired(inner, now);

        while inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                    inner.evictions += 1;
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = TtlCache::new(Duration::from_secs(10), 4);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_least_recently_accessed_is_evicted() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        tokio::time::advance(Duration::from_millis(5)).await;
        cache.insert("b", 2);
        tokio::time::advance(Duration::from_millis(5)).await;

        // Touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_millis(5)).await;
        cache.insert("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_if_absent_keeps_first() {
        let cache = TtlCache::new(Duration::from_secs(60), 8);
        assert_eq!(cache.insert_if_absent("k", 1), 1);
        assert_eq!(cache.insert_if_absent("k", 2), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.insert_if_absent("k", 3), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_clear() {
        let cache = TtlCache::new(Duration::from_secs(3600), 100);
        cache.insert(1u32, "x");
        let _ = cache.get(&1);
        let _ = cache.get(&2);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.ttl_secs, 3600);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
