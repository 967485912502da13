//! A fixed-capacity associative cache with a two-segment recency policy.
//!
//! Entries start out in the "seen-once" segment. The second access to an entry promotes it to the
//! head of the "seen-twice" segment, and every later access moves it back to that head. Evicting
//! from the seen-once segment first protects entries with proven reuse from being flushed out by
//! a scan of entries which are touched only once.
//!
//! Values are wrapped in an [`Evictable`], which decides at insertion time whether the value's
//! [`EvictionListener`] hooks fire when it leaves the cache.

use ahash::RandomState;
use parking_lot::{Mutex, MutexGuard};
use slab::Slab;
use std::{
    collections::HashMap,
    hash::Hash,
    sync::atomic::{AtomicBool, Ordering},
};

pub use evictable::{Evictable, EvictionListener};
use list::{Linked, Links, List};

mod evictable;
mod list;

struct Entry<K, V> {
    key: K,
    value: Evictable<V>,
    // 1 while in the seen-once segment, more afterwards.
    hit_count: u32,
    links: Links,
}

impl<K, V> Linked for Entry<K, V> {
    fn links(&self) -> &Links {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

struct Inner<K, V> {
    entries: Slab<Entry<K, V>>,
    index: HashMap<K, usize, RandomState>,
    once: List,
    twice: List,
    hit_count: u64,
    miss_count: u64,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn len(&self) -> usize {
        self.once.len() + self.twice.len()
    }

    // Record an access to the entry, promoting it to the head of the seen-twice segment.
    fn touch(&mut self, key: usize) {
        let hit_count = self.entries[key].hit_count;
        if hit_count == 1 {
            self.once.unlink(&mut self.entries, key);
            self.twice.push_head(&mut self.entries, key);
        } else {
            self.twice.move_to_head(&mut self.entries, key);
        }
        self.entries[key].hit_count = hit_count.saturating_add(1);
    }

    fn insert(&mut self, key: K, value: Evictable<V>) {
        let slab_key = self.entries.insert(Entry {
            key: key.clone(),
            value,
            hit_count: 1,
            links: Links::default(),
        });
        self.index.insert(key, slab_key);
        self.once.push_head(&mut self.entries, slab_key);
    }

    fn unlink(&mut self, slab_key: usize) -> Entry<K, V> {
        if self.entries[slab_key].hit_count == 1 {
            self.once.unlink(&mut self.entries, slab_key);
        } else {
            self.twice.unlink(&mut self.entries, slab_key);
        }
        let entry = self.entries.remove(slab_key);
        self.index.remove(&entry.key);
        entry
    }

    // The victim of capacity-driven eviction.
    //
    // The seen-once segment is allowed to hold half of the capacity. Beyond that its tail goes
    // first. Otherwise the seen-twice tail is preferred.
    fn lru_tail(&self, capacity: usize) -> Option<usize> {
        if capacity / 2 <= self.once.len() {
            if let Some(tail) = self.once.tail() {
                return Some(tail);
            }
        }
        self.twice.tail().or(self.once.tail())
    }

    // The tail of whichever segment is longer.
    fn longest_tail(&self) -> Option<usize> {
        if self.once.len() <= self.twice.len() {
            self.twice.tail().or(self.once.tail())
        } else {
            self.once.tail().or(self.twice.tail())
        }
    }
}

/// A thread-safe LRU cache distinguishing entries seen once from entries seen more than once.
///
/// Every operation takes a single internal lock. [`EvictionListener::on_before_remove`] hooks run
/// while the lock is held; [`EvictionListener::on_after_remove`] hooks run after it is released,
/// so they may use the cache.
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    enable_listeners: AtomicBool,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        LruCache {
            inner: Mutex::new(Inner {
                entries: Slab::with_capacity(capacity),
                index: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
                once: List::default(),
                twice: List::default(),
                hit_count: 0,
                miss_count: 0,
            }),
            capacity,
            enable_listeners: AtomicBool::new(true),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turn removal hooks on or off. Values removed while disabled are dropped silently.
    pub fn set_enable_listeners(&self, enable: bool) {
        self.enable_listeners.store(enable, Ordering::Relaxed);
    }

    pub fn hit_count(&self) -> u64 {
        self.inner.lock().hit_count
    }

    pub fn miss_count(&self) -> u64 {
        self.inner.lock().miss_count
    }

    /// Check whether the cache contains a key without updating the LRU state.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().index.contains_key(key)
    }

    /// Get a cache entry without updating the LRU state or the hit and miss counts.
    pub fn peek(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.inner.lock();
        let slab_key = *inner.index.get(key)?;
        Some(inner.entries[slab_key].value.value().clone())
    }

    /// Get a cache entry, updating the LRU state.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.inner.lock();
        match inner.index.get(key).copied() {
            Some(slab_key) => {
                inner.touch(slab_key);
                inner.hit_count += 1;
                Some(inner.entries[slab_key].value.value().clone())
            }
            None => {
                inner.miss_count += 1;
                None
            }
        }
    }

    /// Insert or replace an entry, returning the replaced value.
    ///
    /// Inserting a new key into a full cache first evicts entries until there is room. Replacing
    /// an existing key counts as an access and never evicts. The replaced value is handed to its
    /// removal hooks like any other removed value.
    pub fn put(&self, key: K, value: Evictable<V>) -> Option<V> {
        let mut removed = Vec::new();
        let mut inner = self.inner.lock();
        let replaced = match inner.index.get(&key).copied() {
            Some(slab_key) => {
                inner.touch(slab_key);
                let old = std::mem::replace(&mut inner.entries[slab_key].value, value);
                if self.listeners_enabled() {
                    old.fire_before_remove();
                }
                removed.push(old);
                true
            }
            None => {
                self.make_room(&mut inner, &mut removed);
                inner.insert(key, value);
                false
            }
        };
        self.finish_removal(inner, &mut removed);
        if replaced {
            removed.pop().map(Evictable::into_value)
        } else {
            None
        }
    }

    /// Insert an entry unless the key is already present.
    ///
    /// Returns the value now associated with the key: the existing one, which is promoted, or
    /// the newly inserted one.
    pub fn put_if_new(&self, key: K, value: Evictable<V>) -> V
    where
        V: Clone,
    {
        let mut removed = Vec::new();
        let mut inner = self.inner.lock();
        let current = match inner.index.get(&key).copied() {
            Some(slab_key) => {
                inner.touch(slab_key);
                inner.entries[slab_key].value.value().clone()
            }
            None => {
                self.make_room(&mut inner, &mut removed);
                let current = value.value().clone();
                inner.insert(key, value);
                current
            }
        };
        self.finish_removal(inner, &mut removed);
        current
    }

    /// Remove an entry, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut removed = Vec::new();
        let mut inner = self.inner.lock();
        if let Some(slab_key) = inner.index.get(key).copied() {
            self.evict(&mut inner, slab_key, &mut removed);
        }
        self.finish_removal(inner, &mut removed);
        removed.pop().map(Evictable::into_value)
    }

    /// Evict one entry following the capacity policy.
    ///
    /// Returns `false` if the cache is empty.
    pub fn remove_tail(&self) -> bool {
        self.remove_selected(|inner| inner.lru_tail(self.capacity))
    }

    /// Evict the tail of the longer of the two segments.
    ///
    /// This balances the segment lengths instead of preserving strict recency, for callers which
    /// bound the cache by something other than its entry count.
    ///
    /// Returns `false` if the cache is empty.
    pub fn remove_longest_tail(&self) -> bool {
        self.remove_selected(|inner| inner.longest_tail())
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let mut removed = Vec::with_capacity(inner.len());
        let listen = self.listeners_enabled();
        for entry in inner.entries.drain() {
            if listen {
                entry.value.fire_before_remove();
            }
            removed.push(entry.value);
        }
        inner.index.clear();
        inner.once.clear();
        inner.twice.clear();
        self.finish_removal(inner, &mut removed);
    }

    /// Iterate over the entries, seen-twice segment first, each segment from most to least
    /// recently used.
    ///
    /// The cache stays locked while the iterator is alive. Using the cache from the same thread
    /// before dropping the iterator deadlocks.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let inner = self.inner.lock();
        let mut iter = Iter {
            inner,
            cursor: None,
            in_once: false,
        };
        iter.rewind();
        iter
    }

    /// Iterate over the keys in [`LruCache::iter`] order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys(self.iter())
    }

    /// Iterate over the values in [`LruCache::iter`] order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values(self.iter())
    }

    fn listeners_enabled(&self) -> bool {
        self.enable_listeners.load(Ordering::Relaxed)
    }

    fn remove_selected(&self, select: impl FnOnce(&Inner<K, V>) -> Option<usize>) -> bool {
        let mut removed = Vec::new();
        let mut inner = self.inner.lock();
        let found = match select(&inner) {
            Some(slab_key) => {
                self.evict(&mut inner, slab_key, &mut removed);
                true
            }
            None => false,
        };
        self.finish_removal(inner, &mut removed);
        found
    }

    fn make_room(&self, inner: &mut Inner<K, V>, removed: &mut Vec<Evictable<V>>) {
        while inner.len() >= self.capacity {
            // UNWRAP: capacity is non-zero, so a full cache has a tail.
            let slab_key = inner.lru_tail(self.capacity).unwrap();
            self.evict(inner, slab_key, removed);
        }
    }

    fn evict(&self, inner: &mut Inner<K, V>, slab_key: usize, removed: &mut Vec<Evictable<V>>) {
        let entry = inner.unlink(slab_key);
        if self.listeners_enabled() {
            entry.value.fire_before_remove();
        }
        removed.push(entry.value);
    }

    // Releases the lock, then runs the after-remove hooks of everything removed under it.
    fn finish_removal(&self, inner: MutexGuard<'_, Inner<K, V>>, removed: &mut Vec<Evictable<V>>) {
        drop(inner);
        if removed.is_empty() || !self.listeners_enabled() {
            return;
        }
        for value in removed.iter() {
            value.fire_after_remove();
        }
    }
}

/// Iterator over the entries of an [`LruCache`]. See [`LruCache::iter`].
pub struct Iter<'a, K, V> {
    inner: MutexGuard<'a, Inner<K, V>>,
    cursor: Option<usize>,
    in_once: bool,
}

impl<K, V> Iter<'_, K, V> {
    /// Restart the traversal from the head of the seen-twice segment.
    pub fn rewind(&mut self) {
        self.cursor = self.inner.twice.head();
        self.in_once = false;
    }
}

impl<K: Clone, V: Clone> Iterator for Iter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            match self.cursor {
                Some(slab_key) => {
                    let entry = &self.inner.entries[slab_key];
                    self.cursor = entry.links.next;
                    return Some((entry.key.clone(), entry.value.value().clone()));
                }
                None if !self.in_once => {
                    self.in_once = true;
                    self.cursor = self.inner.once.head();
                }
                None => return None,
            }
        }
    }
}

/// Iterator over the keys of an [`LruCache`]. See [`LruCache::keys`].
pub struct Keys<'a, K, V>(Iter<'a, K, V>);

impl<K, V> Keys<'_, K, V> {
    pub fn rewind(&mut self) {
        self.0.rewind()
    }
}

impl<K: Clone, V: Clone> Iterator for Keys<'_, K, V> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.0.next().map(|(k, _)| k)
    }
}

/// Iterator over the values of an [`LruCache`]. See [`LruCache::values`].
pub struct Values<'a, K, V>(Iter<'a, K, V>);

impl<K, V> Values<'_, K, V> {
    pub fn rewind(&mut self) {
        self.0.rewind()
    }
}

impl<K: Clone, V: Clone> Iterator for Values<'_, K, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        self.0.next().map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests;
