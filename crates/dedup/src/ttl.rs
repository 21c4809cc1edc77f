use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::lru_map::LruMap;

struct TtlEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// LRU cache whose entries also expire after a fixed time-to-live.
///
/// Expiry is lazy: a stale entry is dropped when it is next read, there is no
/// background sweep. Capacity eviction follows the same LRU order as
/// [`DedupCache`](crate::DedupCache).
pub struct TtlCache<K: Hash + Eq, V> {
    entries: Mutex<LruMap<K, TtlEntry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Fresh value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
        };
        if expired {
            entries.remove(key);
            trace!("ttl cache entry expired on read");
            return None;
        }
        entries.move_to_front(key);
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or replace, restarting the entry's TTL.
    pub fn set(&self, key: K, value: V) {
        let mut entries = self.lock();
        if entries.get(&key).is_none() {
            while entries.len() >= self.capacity {
                if entries.evict_oldest().is_none() {
                    break;
                }
            }
        }
        entries.set(
            key,
            TtlEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Entry count, including expired entries not yet read.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, LruMap<K, TtlEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_fresh_value() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.set("k", 1);
        assert_eq!(cache.get(&"k"), Some(1));
        assert_eq!(cache.get(&"missing"), None);
    }

    #[test]
    fn expired_entry_is_dropped_on_read() {
        let cache = TtlCache::new(10, Duration::from_millis(10));
        cache.set("k", 1);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn set_restarts_ttl() {
        let cache = TtlCache::new(10, Duration::from_millis(40));
        cache.set("k", 1);
        std::thread::sleep(Duration::from_millis(25));
        cache.set("k", 2);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get(&"k"), Some(2));
    }

    #[test]
    fn capacity_eviction_is_lru_by_read() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.set("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn replacing_existing_key_does_not_evict() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
