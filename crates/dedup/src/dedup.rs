use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use harvest_core::{Fingerprint, JobRecord};
use serde::Serialize;
use tracing::{debug, trace};

use crate::lru_map::LruMap;

/// Bookkeeping kept per remembered fingerprint. Recency is the entry's
/// position in the owning [`LruMap`].
#[derive(Debug, Clone, Copy)]
pub struct CacheEntry {
    pub created_at: Instant,
}

/// Counters exposed for monitoring.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DedupStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

struct DedupState {
    entries: LruMap<Fingerprint, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Capacity-bounded fingerprint cache shared by all fetch workers.
///
/// Both lookups and inserts count as access; when full, the
/// least-recently-accessed fingerprint is evicted before a new one goes in.
pub struct DedupCache {
    state: Mutex<DedupState>,
    capacity: usize,
}

impl DedupCache {
    /// Create a cache holding at most `capacity` fingerprints (min 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(DedupState {
                entries: LruMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Whether this record has been seen before. Unseen records are
    /// remembered as a side effect.
    pub fn is_duplicate(&self, record: &JobRecord) -> bool {
        self.is_duplicate_fingerprint(&Fingerprint::of(record))
    }

    /// Same as [`is_duplicate`](Self::is_duplicate) for a precomputed fingerprint.
    pub fn is_duplicate_fingerprint(&self, fingerprint: &Fingerprint) -> bool {
        let mut state = self.lock();
        if state.entries.move_to_front(fingerprint) {
            state.hits += 1;
            trace!(fingerprint = %fingerprint, "dedup hit");
            return true;
        }
        state.misses += 1;
        self.insert(&mut state, fingerprint.clone());
        false
    }

    /// Remember a record without asking. Used to pre-warm after a cold start.
    pub fn mark_seen(&self, record: &JobRecord) {
        self.mark_seen_fingerprint(Fingerprint::of(record));
    }

    pub fn mark_seen_fingerprint(&self, fingerprint: Fingerprint) {
        let mut state = self.lock();
        if !state.entries.move_to_front(&fingerprint) {
            self.insert(&mut state, fingerprint);
        }
    }

    /// Drop a fingerprint that was remembered but never made it downstream.
    pub fn forget(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().entries.remove(fingerprint).is_some()
    }

    /// Whether a fingerprint is currently remembered. Does not count as access.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().entries.get(fingerprint).is_some()
    }

    /// Forget everything, including counters.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
        state.evictions = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> DedupStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        DedupStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.entries.len(),
            capacity: self.capacity,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    fn insert(&self, state: &mut DedupState, fingerprint: Fingerprint) {
        while state.entries.len() >= self.capacity {
            match state.entries.evict_oldest() {
                Some((evicted, _)) => {
                    state.evictions += 1;
                    debug!(fingerprint = %evicted, "dedup cache evicted oldest entry");
                }
                None => break,
            }
        }
        state.entries.set(
            fingerprint,
            CacheEntry {
                created_at: Instant::now(),
            },
        );
    }

    // The guarded map is never left half-updated, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}
