use super::{Evictable, EvictionListener, LruCache};
use quickcheck::{quickcheck, TestResult};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, OnceLock, Weak,
};

fn filled(capacity: usize, keys: impl IntoIterator<Item = u32>) -> LruCache<u32, u32> {
    let cache = LruCache::new(capacity);
    for key in keys {
        cache.put(key, Evictable::new(key * 10));
    }
    cache
}

#[derive(Default)]
struct HookCounter {
    before: AtomicUsize,
    after: AtomicUsize,
    // When set, the after-remove hook reads from this cache.
    reenter: OnceLock<Weak<LruCache<u32, Arc<HookCounter>>>>,
}

impl HookCounter {
    fn before(&self) -> usize {
        self.before.load(Ordering::SeqCst)
    }

    fn after(&self) -> usize {
        self.after.load(Ordering::SeqCst)
    }
}

impl EvictionListener for Arc<HookCounter> {
    fn on_before_remove(&self) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    fn on_after_remove(&self) {
        self.after.fetch_add(1, Ordering::SeqCst);
        if let Some(cache) = self.reenter.get().and_then(Weak::upgrade) {
            let _ = cache.get(&0);
        }
    }
}

#[test]
fn get_and_miss() {
    let cache = filled(4, 0..3);
    assert_eq!(cache.get(&1), Some(10));
    assert_eq!(cache.get(&7), None);
    assert_eq!(cache.hit_count(), 1);
    assert_eq!(cache.miss_count(), 1);
    assert_eq!(cache.len(), 3);
}

#[test]
fn peek_leaves_recency_and_counts_alone() {
    let cache = filled(3, 1..=3);
    assert_eq!(cache.peek(&1), Some(10));
    assert_eq!(cache.peek(&9), None);
    assert_eq!(cache.hit_count(), 0);
    assert_eq!(cache.miss_count(), 0);

    // Still seen once, so still first out.
    cache.put(4, Evictable::new(40));
    assert!(!cache.contains_key(&1));
}

#[test]
fn second_access_protects_from_eviction() {
    let cache = filled(4, 1..=4);
    assert_eq!(cache.get(&1), Some(10));
    cache.put(5, Evictable::new(50));

    assert!(!cache.contains_key(&2));
    for key in [1, 3, 4, 5] {
        assert!(cache.contains_key(&key), "key {key} was evicted");
    }
}

#[test]
fn fills_to_capacity_then_evicts_oldest() {
    let cache = filled(3, 0..3);
    assert_eq!(cache.len(), 3);
    cache.put(3, Evictable::new(30));
    assert_eq!(cache.len(), 3);
    assert!(!cache.contains_key(&0));
}

#[test]
fn replace_does_not_evict() {
    let cache = filled(2, 0..2);
    assert_eq!(cache.put(1, Evictable::new(11)), Some(10));
    assert_eq!(cache.len(), 2);
    assert!(cache.contains_key(&0));
    assert_eq!(cache.get(&1), Some(11));
}

#[test]
fn put_if_new_keeps_existing() {
    let cache = filled(4, 0..2);
    assert_eq!(cache.put_if_new(1, Evictable::new(99)), 10);
    assert_eq!(cache.put_if_new(2, Evictable::new(20)), 20);
    assert_eq!(cache.get(&1), Some(10));
}

#[test]
fn remove_returns_value() {
    let cache = filled(4, 0..3);
    assert_eq!(cache.remove(&1), Some(10));
    assert_eq!(cache.remove(&1), None);
    assert_eq!(cache.len(), 2);
}

#[test]
fn remove_tail_on_empty_cache_is_false() {
    let cache = LruCache::<u32, u32>::new(2);
    assert!(!cache.remove_tail());
    assert!(!cache.remove_longest_tail());
}

#[test]
fn remove_tail_prefers_seen_twice_while_seen_once_is_small() {
    // capacity 8: the seen-once segment may hold up to 4 entries.
    let cache = filled(8, 0..4);
    // promote 0, 1 and 2; seen-once keeps only 3.
    for key in 0..3 {
        cache.get(&key);
    }
    assert!(cache.remove_tail());
    // the least recently promoted entry goes.
    assert!(!cache.contains_key(&0));
    assert!(cache.contains_key(&3));
}

#[test]
fn remove_longest_tail_balances_segments() {
    let cache = filled(8, 0..5);
    cache.get(&4);
    // seen-once: 3, 2, 1, 0 / seen-twice: 4
    assert!(cache.remove_longest_tail());
    assert!(!cache.contains_key(&0));

    for key in 1..4 {
        cache.get(&key);
    }
    // seen-once: empty / seen-twice: 3, 2, 1, 4
    assert!(cache.remove_longest_tail());
    assert!(!cache.contains_key(&4));
}

#[test]
fn iteration_visits_seen_twice_first() {
    let cache = filled(8, 0..4);
    cache.get(&2);
    cache.get(&0);

    let keys = cache.keys().collect::<Vec<_>>();
    assert_eq!(keys, vec![0, 2, 3, 1]);

    let values = cache.values().collect::<Vec<_>>();
    assert_eq!(values, vec![0, 20, 30, 10]);
}

#[test]
fn iteration_can_rewind() {
    let cache = filled(4, 0..3);
    let mut keys = cache.keys();
    assert_eq!(keys.next(), Some(2));
    assert_eq!(keys.next(), Some(1));
    keys.rewind();
    assert_eq!(keys.collect::<Vec<_>>(), vec![2, 1, 0]);
}

#[test]
fn capacity_one() {
    let cache = filled(1, 0..1);
    cache.get(&0);
    cache.put(1, Evictable::new(10));
    assert_eq!(cache.keys().collect::<Vec<_>>(), vec![1]);
}

#[test]
#[should_panic]
fn zero_capacity_is_rejected() {
    let _ = LruCache::<u32, u32>::new(0);
}

#[test]
fn overflow_fires_hooks_exactly_once() {
    let cache = LruCache::new(4);
    let counters = (0..5).map(|_| Arc::new(HookCounter::default())).collect::<Vec<_>>();
    for (key, counter) in counters.iter().enumerate() {
        cache.put(key as u32, Evictable::listening(counter.clone()));
    }

    let fired = counters
        .iter()
        .map(|p| (p.before(), p.after()))
        .collect::<Vec<_>>();
    assert_eq!(fired, vec![(1, 1), (0, 0), (0, 0), (0, 0), (0, 0)]);
}

#[test]
fn hooks_fire_on_remove_replace_and_clear() {
    let cache = LruCache::new(4);
    let a = Arc::new(HookCounter::default());
    let b = Arc::new(HookCounter::default());
    let c = Arc::new(HookCounter::default());

    cache.put(0, Evictable::listening(a.clone()));
    cache.put(0, Evictable::listening(b.clone()));
    assert_eq!((a.before(), a.after()), (1, 1));

    cache.put(1, Evictable::listening(c.clone()));
    cache.remove(&1);
    assert_eq!((c.before(), c.after()), (1, 1));

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!((b.before(), b.after()), (1, 1));
}

#[test]
fn unlistened_values_fire_nothing() {
    let cache = LruCache::new(1);
    let counter = Arc::new(HookCounter::default());
    cache.put(0, Evictable::new(counter.clone()));
    cache.put(1, Evictable::new(Arc::new(HookCounter::default())));
    assert_eq!((counter.before(), counter.after()), (0, 0));
}

#[test]
fn disabled_listeners_are_skipped() {
    let cache = LruCache::new(1);
    let counter = Arc::new(HookCounter::default());
    cache.set_enable_listeners(false);
    cache.put(0, Evictable::listening(counter.clone()));
    cache.put(1, Evictable::listening(Arc::new(HookCounter::default())));
    assert_eq!((counter.before(), counter.after()), (0, 0));
}

#[test]
fn after_remove_hook_may_use_the_cache() {
    let cache = Arc::new(LruCache::new(1));
    let counter = Arc::new(HookCounter::default());
    let _ = counter.reenter.set(Arc::downgrade(&cache));
    cache.put(1, Evictable::listening(counter.clone()));
    cache.put(0, Evictable::listening(Arc::new(HookCounter::default())));
    assert_eq!(counter.after(), 1);
}

#[test]
fn size_never_exceeds_capacity() {
    fn prop(capacity: u8, ops: Vec<(bool, u8)>) -> TestResult {
        if capacity == 0 {
            return TestResult::discard();
        }
        let cache = LruCache::new(capacity as usize);
        for (is_get, key) in ops {
            if is_get {
                cache.get(&key);
            } else {
                cache.put(key, Evictable::new(()));
            }
            if cache.len() > capacity as usize {
                return TestResult::failed();
            }
        }
        TestResult::passed()
    }
    quickcheck(prop as fn(u8, Vec<(bool, u8)>) -> TestResult);
}

#[test]
fn just_accessed_key_survives_next_eviction() {
    fn prop(keys: Vec<u8>) -> TestResult {
        let mut distinct = keys;
        distinct.sort();
        distinct.dedup();
        if distinct.len() < 3 {
            return TestResult::discard();
        }
        let capacity = distinct.len();
        let cache = LruCache::new(capacity);
        for &key in &distinct {
            cache.put(key as u32, Evictable::new(()));
        }
        let accessed = distinct[0] as u32;
        cache.get(&accessed);
        cache.put(1000, Evictable::new(()));
        TestResult::from_bool(cache.contains_key(&accessed))
    }
    quickcheck(prop as fn(Vec<u8>) -> TestResult);
}
