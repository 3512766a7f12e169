//! Per-function specialization cache
//!
//! Maps a signature key to the value built for it. Each key owns a slot
//! with its own lock, so concurrent first calls for one key build once
//! while builds for different keys proceed in parallel. A failed build
//! leaves its slot empty and the next lookup retries. Entries are never
//! evicted.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crate::error::SpecializeResult;

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

pub struct SpecializationCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> SpecializationCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the value cached for `key`, building it on a miss
    ///
    /// `build` runs at most once per key unless it fails. Callers racing on
    /// the same key wait for the first build and share its result.
    pub fn lookup_or_build<F>(&self, key: &K, build: F) -> SpecializeResult<Arc<V>>
    where
        F: FnOnce(&K) -> SpecializeResult<V>,
    {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut value = lock(&slot);
        if let Some(existing) = value.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let built = Arc::new(build(key)?);
        *value = Some(Arc::clone(&built));
        Ok(built)
    }

    /// Cached value for `key`, waiting for an in-flight build
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let value = lock(&slot);
        value.clone()
    }

    /// Keys with a published value
    ///
    /// Slots still being built are skipped rather than waited on.
    pub fn keys(&self) -> Vec<K> {
        lock(&self.slots)
            .iter()
            .filter(|(_, slot)| is_filled(slot))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).values().filter(|slot| is_filled(slot)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for SpecializationCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

fn is_filled<V>(slot: &Mutex<Option<Arc<V>>>) -> bool {
    match slot.try_lock() {
        Ok(value) => value.is_some(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
        Err(TryLockError::WouldBlock) => false,
    }
}

/// A panicking build leaves its slot empty, which is a consistent state
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpecializeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_hit_reuses_value() {
        let cache = SpecializationCache::new();
        let builds = AtomicUsize::new(0);
        let build = |key: &u32| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(format!("entry-{}", key))
        };

        let first = cache.lookup_or_build(&4, build).unwrap();
        let second = cache.lookup_or_build(&4, build).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let other = cache.lookup_or_build(&8, build).unwrap();
        assert_eq!(*other, "entry-8");
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache: SpecializationCache<u32, String> = SpecializationCache::new();
        let result = cache.lookup_or_build(&1, |_| Err(SpecializeError::compilation("transient")));
        assert!(matches!(result, Err(SpecializeError::CompilationError { .. })));
        assert!(cache.is_empty());
        assert!(cache.get(&1).is_none());

        let retried = cache.lookup_or_build(&1, |_| Ok("built".to_string())).unwrap();
        assert_eq!(*retried, "built");
        assert_eq!(cache.keys(), vec![1]);
    }

    #[test]
    fn test_panicking_build_leaves_slot_retryable() {
        let cache: SpecializationCache<u32, u32> = SpecializationCache::new();
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cache.lookup_or_build(&1, |_| -> SpecializeResult<u32> { panic!("builder crashed") });
        }));
        assert!(panicked.is_err());
        assert_eq!(*cache.lookup_or_build(&1, |_| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_concurrent_first_calls_build_once() {
        let cache: SpecializationCache<u32, usize> = SpecializationCache::new();
        let builds = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        let values: Vec<Arc<usize>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache
                            .lookup_or_build(&42, |_| {
                                thread::sleep(Duration::from_millis(20));
                                Ok(builds.fetch_add(1, Ordering::SeqCst))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }

    #[test]
    fn test_distinct_keys_build_independently() {
        let cache: SpecializationCache<u32, u32> = SpecializationCache::new();
        thread::scope(|scope| {
            for key in 0..4u32 {
                let cache = &cache;
                scope.spawn(move || cache.lookup_or_build(&key, |k| Ok(k * 10)).unwrap());
            }
        });
        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec![0, 1, 2, 3]);
        assert_eq!(cache.get(&3).map(|v| *v), Some(30));
    }
}
