//! Bounded cache keyed by page id.
//!
//! Uses clock eviction (approximate LRU) for low overhead. Everything cached
//! is derived from committed, immutable pages, so entries never need
//! invalidation; they are only dropped to make room.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use crate::error::PageId;

/// Bounded cache with clock eviction.
///
/// A capacity of zero disables caching: inserts are dropped and every lookup
/// is a miss.
pub struct ClockCache<V> {
    state: Mutex<ClockState<V>>,
    /// Maximum number of entries.
    capacity: usize,
    /// Total cache hits since creation.
    hits: AtomicU64,
    /// Total cache misses since creation.
    misses: AtomicU64,
    /// Total evictions since creation.
    evictions: AtomicU64,
}

struct ClockState<V> {
    entries: HashMap<PageId, CacheEntry<V>>,
    /// Clock ring; slot `i` holds the id occupying it.
    ring: Vec<PageId>,
    /// Clock hand for eviction.
    hand: usize,
}

/// Cache entry with access tracking.
struct CacheEntry<V> {
    value: V,
    /// Whether the entry was accessed since the last sweep (second chance).
    accessed: bool,
}

impl<V: Clone> ClockCache<V> {
    /// Creates a new cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ClockState {
                entries: HashMap::with_capacity(capacity),
                ring: Vec::with_capacity(capacity),
                hand: 0,
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns a clone of the cached value, or `None` if not present.
    pub fn get(&self, page_id: PageId) -> Option<V> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(&page_id) {
            entry.accessed = true;
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Inserts a value, evicting one entry if the cache is full.
    pub fn insert(&self, page_id: PageId, value: V) {
        if self.capacity == 0 {
            return;
        }

        let mut guard = self.state.lock();
        let ClockState { entries, ring, hand } = &mut *guard;

        if let Some(entry) = entries.get_mut(&page_id) {
            entry.value = value;
            entry.accessed = true;
            return;
        }

        if ring.len() < self.capacity {
            ring.push(page_id);
        } else {
            // Sweep until an entry without a second chance turns up. Each
            // pass clears flags, so this ends within two sweeps.
            loop {
                let victim = ring[*hand];
                match entries.get_mut(&victim) {
                    Some(entry) if entry.accessed => {
                        entry.accessed = false;
                        *hand = (*hand + 1) % ring.len();
                    },
                    _ => {
                        entries.remove(&victim);
                        ring[*hand] = page_id;
                        *hand = (*hand + 1) % ring.len();
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        break;
                    },
                }
            }
        }

        entries.insert(page_id, CacheEntry { value, accessed: true });
    }

    /// Checks if an entry is in the cache without touching statistics.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().entries.contains_key(&page_id)
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Checks if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all cached entries. Statistics are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.ring.clear();
        state.hand = 0;
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of cached entries.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
    /// Total cache hits since creation.
    pub hits: u64,
    /// Total cache misses since creation.
    pub misses: u64,
    /// Total evictions since creation.
    pub evictions: u64,
}
