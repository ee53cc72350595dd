//! Size-bounded response cache with least-recently-used eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;

use crate::config::CacheConfig;
use crate::observability::metrics;

/// Errors raised by [`ObjectCache::update`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Nothing left to evict but the object still does not fit.
    #[error("cache cannot make room for {needed} bytes ({used}/{capacity} used)")]
    NoSpace {
        needed: usize,
        used: usize,
        capacity: usize,
    },
}

/// Result of a successful [`ObjectCache::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    /// Stored after evicting `evicted` entries worth `freed` bytes.
    Stored { evicted: usize, freed: usize },
    /// Larger than the per-object maximum; not cached.
    TooLarge,
}

/// One cached response.
#[derive(Debug)]
pub struct CacheEntry {
    value: Bytes,
    /// Logical clock value of the last touch.
    last_access: AtomicU64,
    /// Touches since insertion, insertion included.
    hits: AtomicU64,
}

impl CacheEntry {
    fn new(value: Bytes, now: u64) -> Self {
        Self {
            value,
            last_access: AtomicU64::new(now),
            hits: AtomicU64::new(1),
        }
    }

    fn touch(&self, now: u64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn recency(&self) -> (u64, u64) {
        (
            self.last_access.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
        )
    }

    pub fn size(&self) -> usize {
        self.value.len()
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<Bytes, CacheEntry>,
    used: usize,
}

impl CacheInner {
    /// Remove the entry with the smallest `(last_access, hits)`.
    fn evict_lru(&mut self) -> Option<(Bytes, usize)> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency())
            .map(|(key, _)| key.clone())?;
        let entry = self.entries.remove(&victim)?;
        self.used -= entry.size();
        Some((victim, entry.size()))
    }
}

/// Shared response cache guarded by one reader-writer lock.
///
/// Lookups take the read side and touch entries through atomics; inserts
/// and evictions take the write side for their full duration.
#[derive(Debug)]
pub struct ObjectCache {
    inner: RwLock<CacheInner>,
    clock: AtomicU64,
    capacity: usize,
    max_object: usize,
}

impl ObjectCache {
    pub fn new(capacity: usize, max_object: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            clock: AtomicU64::new(0),
            capacity,
            max_object,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity_bytes, config.max_object_bytes)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up `key`, refreshing its recency when found.
    pub fn query(&self, key: &[u8]) -> Option<Bytes> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.entries.get(key)?;
        entry.touch(self.tick());
        Some(entry.value.clone())
    }

    /// Existence check; touches the entry like [`query`](Self::query).
    pub fn contains(&self, key: &[u8]) -> bool {
        self.query(key).is_some()
    }

    /// Insert `value` under `key`, evicting until it fits.
    ///
    /// Objects over the per-object maximum are skipped silently. An existing
    /// entry for the same key is replaced.
    pub fn update(&self, key: Bytes, value: Bytes) -> Result<CacheUpdate, CacheError> {
        let size = value.len();
        if size > self.max_object {
            tracing::debug!(size, max_object = self.max_object, "Object too large to cache");
            return Ok(CacheUpdate::TooLarge);
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = inner.entries.remove(&key) {
            inner.used -= previous.size();
        }

        let mut evicted = 0;
        let mut freed = 0;
        while size > self.capacity - inner.used {
            let Some((_, bytes)) = inner.evict_lru() else {
                return Err(CacheError::NoSpace {
                    needed: size,
                    used: inner.used,
                    capacity: self.capacity,
                });
            };
            evicted += 1;
            freed += bytes;
        }

        let now = self.tick();
        inner.entries.insert(key, CacheEntry::new(value, now));
        inner.used += size;

        metrics::record_cache_store(inner.used, evicted);
        tracing::debug!(size, used = inner.used, evicted, freed, "Cached object");
        Ok(CacheUpdate::Stored { evicted, freed })
    }

    /// Evict the globally least-recently-used entry, returning its size.
    pub fn remove_least_recently_used(&self) -> Option<usize> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let (_, size) = inner.evict_lru()?;
        metrics::record_cache_store(inner.used, 1);
        Some(size)
    }

    /// Bytes currently stored.
    pub fn size(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).used
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_object(&self) -> usize {
        self.max_object
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
        inner.used = 0;
    }
}
