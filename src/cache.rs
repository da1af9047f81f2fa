//! The underpriced negative cache (§4.7).
//!
//! Modeled on the teacher's `cache::LruMap` usage in `fetcher.rs`
//! (`schnellru::LruMap` bounded `ByLength`), extended with the lazy
//! age-based eviction the spec calls for: an entry older than
//! `underpriced_timeout` is treated as absent on lookup and is then evicted,
//! rather than proactively swept by a background task.

use crate::types::Hash;
use schnellru::{ByLength, LruMap};
use std::time::Duration;
use tokio::time::Instant;

/// Bounded LRU mapping a hash to the instant it was judged underpriced.
#[derive(Debug)]
pub struct UnderpricedCache {
    entries: LruMap<Hash, Instant, ByLength>,
    timeout: Duration,
}

impl UnderpricedCache {
    /// Creates a new cache bounded to `capacity` entries, with `timeout` as
    /// the maximum age before an entry is treated as absent.
    pub fn new(capacity: u32, timeout: Duration) -> Self {
        Self { entries: LruMap::new(ByLength::new(capacity)), timeout }
    }

    /// Records `hash` as underpriced as of `now`.
    pub fn insert(&mut self, hash: Hash, now: Instant) {
        self.entries.insert(hash, now);
    }

    /// Returns `true` if `hash` is present and not yet expired. Lazily
    /// evicts the entry if it has expired.
    pub fn contains(&mut self, hash: &Hash, now: Instant) -> bool {
        let Some(inserted_at) = self.entries.peek(hash).copied() else { return false };
        if now.saturating_duration_since(inserted_at) > self.timeout {
            self.entries.remove(hash);
            return false
        }
        true
    }

    /// Current number of entries, including any not yet lazily evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn hash(byte: u8) -> Hash {
        Hash(B256::from_slice(&[byte; 32]))
    }

    #[test]
    fn expired_entries_are_treated_as_absent_and_evicted() {
        let mut cache = UnderpricedCache::new(8, Duration::from_secs(60));
        let t0 = Instant::now();
        cache.insert(hash(1), t0);

        assert!(cache.contains(&hash(1), t0 + Duration::from_secs(30)));
        assert_eq!(cache.len(), 1);

        assert!(!cache.contains(&hash(1), t0 + Duration::from_secs(61)));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn bounded_by_length() {
        let mut cache = UnderpricedCache::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        cache.insert(hash(1), t0);
        cache.insert(hash(2), t0);
        cache.insert(hash(3), t0);
        assert_eq!(cache.len(), 2);
    }
}
