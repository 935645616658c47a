//! LRU cache with per-entry TTL.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Capacity-bounded LRU whose entries carry an absolute expiry.
///
/// Expiry is lazy: an expired entry survives in memory until a `get` touches
/// it (or the LRU pushes it out); there is no background sweeper.
pub(crate) struct LocalCache {
    entries: LruCache<String, Entry>,
}

impl LocalCache {
    /// Creates a cache holding up to `capacity` entries; zero means
    /// unbounded, leaving eviction entirely to TTLs.
    pub(crate) fn new(capacity: usize) -> Self {
        LocalCache {
            entries: match NonZeroUsize::new(capacity) {
                Some(capacity) => LruCache::new(capacity),
                None => LruCache::unbounded(),
            },
        }
    }

    pub(crate) fn add(&mut self, key: &str, value: String, ttl_ms: u64) {
        self.entries.put(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + Duration::from_millis(ttl_ms),
            },
        );
    }

    pub(crate) fn get(&mut self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        // Present but expired: evict lazily and report absent.
        self.entries.pop(key);
        None
    }

    pub(crate) fn remove(&mut self, key: &str) {
        self.entries.pop(key);
    }
}
