//! Thread-safe, size-bounded LRU response cache.
//!
//! The original `cache.c` scans a singly linked list on every operation.
//! Per the redesign notes this crate instead backs the cache with the
//! `lru` crate's order-maintaining map, so `find` and eviction are O(1)
//! amortized while still exposing exactly the find/add/remove_lru/size/
//! clear/dump surface the spec describes.

use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-entry accounted-size cap (10 MiB).
pub const MAX_ENTRY_SIZE: usize = 10 * 1024 * 1024;
/// Total accounted-size cap across all entries (200 MiB).
pub const MAX_CACHE_BYTES: usize = 200 * 1024 * 1024;
/// Fixed per-entry bookkeeping overhead folded into accounted size.
const ENTRY_OVERHEAD: usize = 64;
/// Structural slot cap for the backing map; the byte-size bounds above are
/// what actually governs eviction, this just keeps the map's own capacity
/// non-zero and generous.
const MAX_ENTRIES: usize = 1_000_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Bytes,
    pub last_access: u64,
}

impl CacheEntry {
    fn accounted_size(key: &str, payload: &Bytes) -> usize {
        payload.len() + key.len() + 1 + ENTRY_OVERHEAD
    }
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    total_size: usize,
}

/// Bounded, single-writer LRU cache of proxy responses.
///
/// All operations acquire the same mutex for the duration of the call:
/// the spec's "single exclusion primitive" discipline, not split locks
/// with independent atomics.
#[derive(Clone)]
pub struct Cache {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                entries: LruCache::new(NonZeroUsize::new(MAX_ENTRIES).unwrap()),
                total_size: 0,
            })),
        }
    }

    /// Returns the payload for `key`, refreshing its last-access stamp.
    pub async fn find(&self, key: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        let now = now_secs();
        let entry = inner.entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.payload.clone())
    }

    /// Inserts or replaces `key`. Returns `false` (no-op) if the entry on
    /// its own exceeds [`MAX_ENTRY_SIZE`]; otherwise evicts LRU entries
    /// until there is room and returns `true`.
    pub async fn add(&self, key: String, payload: Bytes) -> bool {
        let new_size = CacheEntry::accounted_size(&key, &payload);
        if new_size > MAX_ENTRY_SIZE {
            debug!(key = %key, size = new_size, "cache add rejected: exceeds per-entry cap");
            return false;
        }

        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.entries.pop(&key) {
            let old_size = CacheEntry::accounted_size(&key, &existing.payload);
            inner.total_size -= old_size;
        }

        while inner.total_size + new_size > MAX_CACHE_BYTES && !inner.entries.is_empty() {
            if let Some((evicted_key, evicted)) = inner.entries.pop_lru() {
                let evicted_size = CacheEntry::accounted_size(&evicted_key, &evicted.payload);
                inner.total_size -= evicted_size;
                debug!(key = %evicted_key, "evicted LRU entry to make room");
            } else {
                break;
            }
        }

        inner.entries.put(
            key.clone(),
            CacheEntry {
                key,
                payload,
                last_access: now_secs(),
            },
        );
        inner.total_size += new_size;
        true
    }

    /// Evicts the least-recently-used entry, if any.
    pub async fn remove_lru(&self) {
        let mut inner = self.inner.lock().await;
        if let Some((key, evicted)) = inner.entries.pop_lru() {
            let size = CacheEntry::accounted_size(&key, &evicted.payload);
            inner.total_size -= size;
        }
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.total_size
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.total_size = 0;
    }

    /// Diagnostic dump of current cache contents to the log.
    pub async fn dump(&self) {
        let inner = self.inner.lock().await;
        debug!(
            entries = inner.entries.len(),
            total_size = inner.total_size,
            "cache contents"
        );
        for (key, entry) in inner.entries.iter() {
            debug!(key = %key, size = entry.payload.len(), last_access = entry.last_access, "cache entry");
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
