//! Caching Layer
//!
//! In-memory TTL + LRU cache with hit/miss statistics.
//!
//! Entries live in an arena (`Vec` of slots) threaded by an intrusive
//! doubly-linked list of indices, ordered from most to least recently
//! accessed. A `HashMap` maps keys to slots, so `get`, `put` and eviction are
//! all O(1). Values are cloned out on read; callers never hold a reference
//! into the store.
//!
//! ## Usage
//!
//! ```
//! use std::time::Duration;
//! use tokio_hybrid_router::enhanced::CacheStore;
//!
//! let cache: CacheStore<String> = CacheStore::new(1000, Duration::from_secs(3600));
//!
//! cache.put("route:abc", "cached answer".to_string());
//! assert_eq!(cache.get("route:abc"), Some("cached answer".to_string()));
//! assert_eq!(cache.stats().hits, 1);
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A cached value plus its bookkeeping.
struct CacheEntry<V> {
    key: String,
    value: V,
    inserted_at: Instant,
    last_accessed_at: Instant,
    ttl: Duration,
    /// Towards the most recently used end.
    prev: Option<usize>,
    /// Towards the least recently used end.
    next: Option<usize>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

/// Arena-backed LRU list. Not thread-safe on its own; always used behind the
/// store's mutex.
struct LruState<V> {
    index: HashMap<String, usize>,
    slots: Vec<Option<CacheEntry<V>>>,
    free: Vec<usize>,
    /// Most recently accessed.
    head: Option<usize>,
    /// Least recently accessed.
    tail: Option<usize>,
}

impl<V> LruState<V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn entry(&self, slot: usize) -> Option<&CacheEntry<V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, slot: usize) -> Option<&mut CacheEntry<V>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Unlink `slot` from the list, leaving it in the arena.
    fn detach(&mut self, slot: usize) {
        let (prev, next) = match self.entry(slot) {
            Some(e) => (e.prev, e.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(e) = self.entry_mut(p) {
                    e.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(e) = self.entry_mut(n) {
                    e.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(e) = self.entry_mut(slot) {
            e.prev = None;
            e.next = None;
        }
    }

    /// Link `slot` in as the most recently used entry.
    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(e) = self.entry_mut(slot) {
            e.prev = None;
            e.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(e) = self.entry_mut(h) {
                e.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        let key = entry.key.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
    }

    fn remove_slot(&mut self, slot: usize) -> Option<CacheEntry<V>> {
        self.detach(slot);
        let entry = self.slots.get_mut(slot).and_then(Option::take)?;
        self.index.remove(&entry.key);
        self.free.push(slot);
        Some(entry)
    }

    fn remove_key(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let slot = *self.index.get(key)?;
        self.remove_slot(slot)
    }

    /// Drop the least recently accessed entry.
    fn pop_lru(&mut self) -> Option<CacheEntry<V>> {
        let tail = self.tail?;
        self.remove_slot(tail)
    }

    fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }
}

struct Inner<V> {
    state: Mutex<LruState<V>>,
    max_entries: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Thread-safe TTL + LRU cache.
///
/// Cloning a `CacheStore` yields another handle to the same storage.
pub struct CacheStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CacheStore<V> {
    /// Create a cache holding at most `max_entries` values, each living for
    /// `default_ttl` unless stored with [`put_with_ttl`](Self::put_with_ttl).
    ///
    /// A capacity of zero yields a cache that stores nothing.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LruState::new()),
                max_entries,
                default_ttl,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                expirations: AtomicU64::new(0),
            }),
        }
    }

    /// Number of entries currently stored (expired ones included until they
    /// are touched or purged).
    pub fn len(&self) -> usize {
        self.inner.state.lock().len()
    }

    /// `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("max_entries", &self.inner.max_entries)
            .field("default_ttl", &self.inner.default_ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl<V: Clone> CacheStore<V> {
    /// Look up `key`, returning a copy of the value on a hit.
    ///
    /// An expired entry counts as a miss and is removed on the spot; it never
    /// takes part in the recency ordering of the survivors.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.inner.state.lock();

        let Some(&slot) = state.index.get(key) else {
            drop(state);
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = key, "cache miss");
            return None;
        };

        let expired = state.entry(slot).map_or(true, |e| e.is_expired(now));
        if expired {
            state.remove_slot(slot);
            drop(state);
            self.inner.expirations.fetch_add(1, Ordering::Relaxed);
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = key, "cache expired");
            return None;
        }

        state.detach(slot);
        state.push_front(slot);
        let value = state.entry_mut(slot).map(|e| {
            e.last_accessed_at = now;
            e.value.clone()
        });
        drop(state);

        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "cache hit");
        value
    }

    /// Store `value` under `key` with the default TTL.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.put_with_ttl(key, value, self.inner.default_ttl);
    }

    /// Store `value` under `key` with an explicit TTL.
    ///
    /// Overwriting an existing key refreshes it in place. Inserting a new key
    /// into a full cache first evicts least recently accessed entries until
    /// there is room.
    pub fn put_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        if self.inner.max_entries == 0 {
            debug!(key = key, "cache disabled (capacity 0), not storing");
            return;
        }

        let now = Instant::now();
        let mut state = self.inner.state.lock();

        if let Some(&slot) = state.index.get(&key) {
            if let Some(e) = state.entry_mut(slot) {
                e.value = value;
                e.inserted_at = now;
                e.last_accessed_at = now;
                e.ttl = ttl;
            }
            state.detach(slot);
            state.push_front(slot);
            debug!(key = key, ttl_ms = millis(ttl), "cache entry replaced");
            return;
        }

        let mut evicted = 0_u64;
        while state.len() >= self.inner.max_entries {
            match state.pop_lru() {
                Some(old) => {
                    debug!(
                        evicted = old.key,
                        idle_ms = millis(now.saturating_duration_since(old.last_accessed_at)),
                        "cache eviction (lru)"
                    );
                    evicted += 1;
                }
                None => break,
            }
        }

        state.insert(CacheEntry {
            key: key.clone(),
            value,
            inserted_at: now,
            last_accessed_at: now,
            ttl,
            prev: None,
            next: None,
        });
        drop(state);

        if evicted > 0 {
            self.inner.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        debug!(key = key, ttl_ms = millis(ttl), "cached");
    }

    /// Remove `key`, returning its value if it was present and unexpired.
    pub fn remove(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let entry = self.inner.state.lock().remove_key(key)?;
        if entry.is_expired(now) {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Drop every entry. Hit/miss counters are preserved.
    pub fn clear(&self) {
        self.inner.state.lock().clear();
        debug!("cache cleared");
    }

    /// Eagerly remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.lock();

        let expired: Vec<usize> = state
            .index
            .values()
            .copied()
            .filter(|&slot| state.entry(slot).map_or(false, |e| e.is_expired(now)))
            .collect();
        for &slot in &expired {
            state.remove_slot(slot);
        }
        drop(state);

        let purged = expired.len();
        if purged > 0 {
            self.inner
                .expirations
                .fetch_add(purged as u64, Ordering::Relaxed);
            debug!(purged = purged, "cache purged expired entries");
        }
        purged
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            expirations: self.inner.expirations.load(Ordering::Relaxed),
            size: self.len(),
            max_size: self.inner.max_entries,
        }
    }
}

/// Cache statistics, recomputed on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries dropped to make room for new ones.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Number of entries currently held.
    pub size: usize,
    /// Configured capacity.
    pub max_size: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, `0.0` when nothing was looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Normalise a query for fingerprinting: trim, lowercase, and collapse runs
/// of whitespace to a single space.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable cache key for a (query, context) pair.
///
/// Queries that differ only in case or whitespace share a key; the context is
/// hashed verbatim.
pub fn cache_key(query: &str, context: Option<&str>) -> String {
    use std::collections::hash_map::DefaultHasher;

    let mut hasher = DefaultHasher::new();
    normalize_query(query).hash(&mut hasher);
    context.unwrap_or_default().hash(&mut hasher);
    format!("route:{:x}", hasher.finish())
}
