use std::hash::Hash;

use lru::LruCache;

/// Recency-ordered map with an intentionally small surface.
///
/// Reads through [`get`](Self::get) do not reorder; callers decide when an
/// access counts by calling [`move_to_front`](Self::move_to_front). Capacity
/// is not enforced here either: owners call [`evict_oldest`](Self::evict_oldest)
/// before inserting, so every eviction is visible at the call site.
///
/// Not synchronized. Owners wrap it in a `Mutex`.
pub struct LruMap<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq, V> LruMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: LruCache::unbounded(),
        }
    }

    /// Look up without touching recency.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    /// Insert or replace at the most-recently-used position.
    pub fn set(&mut self, key: K, value: V) {
        self.inner.put(key, value);
    }

    /// Remove and return the least-recently-used entry.
    pub fn evict_oldest(&mut self) -> Option<(K, V)> {
        self.inner.pop_lru()
    }

    /// Mark an entry as most recently used. Returns false if absent.
    pub fn move_to_front(&mut self, key: &K) -> bool {
        if self.inner.contains(key) {
            self.inner.promote(key);
            true
        } else {
            false
        }
    }

    /// Drop a single entry. Only used for TTL expiry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl<K: Hash + Eq, V> Default for LruMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
