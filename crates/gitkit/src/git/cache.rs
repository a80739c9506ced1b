//! Bounded LRU cache of decoded objects.

use lru::LruCache;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::object::{ObjectId, RawObject};

/// Default cache budget: 96 MiB of object bodies.
pub const DEFAULT_CACHE_BYTES: usize = 96 * 1024 * 1024;

/// Least-recently-used object cache bounded by total body size.
///
/// Objects larger than the whole budget are never cached.
pub struct ObjectCache {
    state: Mutex<CacheState>,
}

struct CacheState {
    entries: LruCache<ObjectId, Arc<RawObject>>,
    used: usize,
    capacity: usize,
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}

impl ObjectCache {
    /// Create a cache holding at most `capacity` bytes of object data.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                used: 0,
                capacity,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<RawObject>> {
        self.lock().entries.get(id).cloned()
    }

    pub fn put(&self, id: ObjectId, object: Arc<RawObject>) {
        let mut state = self.lock();
        let size = object.data.len();
        if size > state.capacity {
            return;
        }

        if let Some(previous) = state.entries.put(id, object) {
            state.used -= previous.data.len();
        }
        state.used += size;

        while state.used > state.capacity {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.used -= evicted.data.len(),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of object data currently cached.
    pub fn used_bytes(&self) -> usize {
        self.lock().used
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(content: &[u8]) -> (ObjectId, Arc<RawObject>) {
        let object = RawObject::blob(content.to_vec());
        (object.id(), Arc::new(object))
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ObjectCache::new(8);
        let (a, a_obj) = blob(b"aaaa");
        let (b, b_obj) = blob(b"bbbb");
        let (c, c_obj) = blob(b"cccc");

        cache.put(a, a_obj);
        cache.put(b, b_obj);
        // touch `a` so `b` becomes the eviction candidate
        assert!(cache.get(&a).is_some());
        cache.put(c, c_obj);

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.used_bytes(), 8);
    }

    #[test]
    fn test_oversized_objects_are_skipped() {
        let cache = ObjectCache::new(2);
        let (id, object) = blob(b"too large");

        cache.put(id, object);
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_reinsert_does_not_double_count() {
        let cache = ObjectCache::new(100);
        let (id, object) = blob(b"same");

        cache.put(id, Arc::clone(&object));
        cache.put(id, object);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 4);
    }
}
