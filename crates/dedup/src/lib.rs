//! Duplicate suppression for incoming job records.
//!
//! - [`LruMap`]: ordered map exposing only the operations LRU logic needs
//! - [`DedupCache`]: fingerprint identity cache, capacity-bounded
//! - [`TtlCache`]: general-purpose LRU cache with lazy time-to-live expiry

pub mod dedup;
pub mod lru_map;
pub mod ttl;

pub use dedup::{CacheEntry, DedupCache, DedupStats};
pub use lru_map::LruMap;
pub use ttl::TtlCache;
