//! LRU pool of read handles.

use lru::LruCache;
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

/// Shared read handle to one segment. The mutex guards the file cursor.
pub(crate) type SegmentHandle = Arc<Mutex<File>>;

/// Keeps recently read segments open so point reads do not pay an
/// open/close per call.
pub(crate) struct HandlePool {
    cache: Mutex<LruCache<u64, SegmentHandle>>,
}

impl HandlePool {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached handle for `file_id`, opening `path` on a miss.
    pub(crate) fn get(&self, file_id: u64, path: &Path) -> io::Result<SegmentHandle> {
        let mut cache = self.cache.lock();
        if let Some(handle) = cache.get(&file_id) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(Mutex::new(File::open(path)?));
        cache.put(file_id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drops cached handles for every id at or above `file_id`.
    pub(crate) fn invalidate_from(&self, file_id: u64) {
        let mut cache = self.cache.lock();
        let stale: Vec<u64> = cache
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id >= file_id)
            .collect();
        for id in stale {
            cache.pop(&id);
        }
    }

    pub(crate) fn clear(&self) {
        self.cache.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.cache.lock().len()
    }
}
