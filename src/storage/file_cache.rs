//! Bounded cache of open file handles.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;

use super::io::open_for_read;
use crate::RequestPath;
use crate::stats::TimedAverageWindow;

#[derive(Debug)]
struct CachedFile {
    file: Arc<File>,
    active_reads: u32,
}

/// Outcome of [`FileCache::acquire`].
#[derive(Debug)]
pub(crate) enum Acquired {
    /// A handle is ready; the read must be released with [`FileCache::release`].
    File(Arc<File>),
    /// Every cached handle is busy; try again later.
    CacheFull,
    /// The file could not be opened.
    Failed(io::Error),
}

/// Open handles keyed by path, evicting the least recently used idle handle.
///
/// Handles with active reads are never evicted. Handles of dedicated-cache
/// paths live outside the LRU and do not count against its capacity. Reads
/// hold their own reference to the handle, so flushing a path while it is
/// being read is safe.
#[derive(Debug)]
pub(crate) struct FileCache {
    handles: LruCache<RequestPath, CachedFile>,
    dedicated: HashSet<RequestPath>,
    pinned: HashMap<RequestPath, CachedFile>,
    open_time: TimedAverageWindow<64>,
}

impl FileCache {
    pub(crate) fn new(capacity: u32) -> Self {
        let capacity = NonZeroUsize::new(capacity as usize).unwrap_or(NonZeroUsize::MIN);
        Self {
            handles: LruCache::new(capacity),
            dedicated: HashSet::new(),
            pinned: HashMap::new(),
            open_time: TimedAverageWindow::new(),
        }
    }

    /// Returns a handle for `path`, opening it if needed, and counts one active read.
    pub(crate) fn acquire(&mut self, path: &RequestPath, shared: bool) -> Acquired {
        if let Some(cached) = self.pinned.get_mut(path) {
            cached.active_reads += 1;
            return Acquired::File(Arc::clone(&cached.file));
        }
        if let Some(cached) = self.handles.get_mut(path) {
            cached.active_reads += 1;
            return Acquired::File(Arc::clone(&cached.file));
        }

        let dedicated = self.dedicated.contains(path);
        if !dedicated && self.handles.len() >= self.handles.cap().get() && !self.evict_one() {
            return Acquired::CacheFull;
        }

        let start = Instant::now();
        let file = match open_for_read(path.absolute_path(), shared) {
            Ok(file) => Arc::new(file),
            Err(e) => return Acquired::Failed(e),
        };
        self.open_time.push(start.elapsed());

        let cached = CachedFile {
            file: Arc::clone(&file),
            active_reads: 1,
        };
        if dedicated {
            self.pinned.insert(path.clone(), cached);
        } else {
            self.handles.put(path.clone(), cached);
        }
        Acquired::File(file)
    }

    fn evict_one(&mut self) -> bool {
        let victim = self
            .handles
            .iter()
            .rev()
            .find(|(_, cached)| cached.active_reads == 0)
            .map(|(path, _)| path.clone());
        match victim {
            Some(path) => {
                log::trace!("Closing cached handle for '{}'", path);
                self.handles.pop(&path);
                true
            }
            None => false,
        }
    }

    /// Ends one active read on `path`.
    pub(crate) fn release(&mut self, path: &RequestPath) {
        let cached = match self.pinned.get_mut(path) {
            Some(cached) => Some(cached),
            None => self.handles.peek_mut(path),
        };
        if let Some(cached) = cached {
            cached.active_reads = cached.active_reads.saturating_sub(1);
        }
    }

    pub(crate) fn contains(&self, path: &RequestPath) -> bool {
        self.pinned.contains_key(path) || self.handles.contains(path)
    }

    /// Returns the size of an open file.
    pub(crate) fn file_size(&self, path: &RequestPath) -> Option<u64> {
        let cached = self.pinned.get(path).or_else(|| self.handles.peek(path))?;
        cached.file.metadata().ok().map(|meta| meta.len())
    }

    /// Closes the handle of `path`. Returns true if one was open.
    pub(crate) fn flush(&mut self, path: &RequestPath) -> bool {
        match self.pinned.remove(path).or_else(|| self.handles.pop(path)) {
            Some(cached) => {
                if cached.active_reads > 0 {
                    log::debug!(
                        "Flushing '{}' with {} active reads",
                        path,
                        cached.active_reads
                    );
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn flush_all(&mut self) {
        self.handles.clear();
        self.pinned.clear();
    }

    /// Pins `path` so its handle is never evicted.
    pub(crate) fn create_dedicated(&mut self, path: RequestPath) {
        if let Some(cached) = self.handles.pop(&path) {
            self.pinned.insert(path.clone(), cached);
        }
        self.dedicated.insert(path);
    }

    /// Unpins `path`. An open pinned handle goes back into the LRU.
    pub(crate) fn destroy_dedicated(&mut self, path: &RequestPath) -> bool {
        if let Some(cached) = self.pinned.remove(path) {
            // Whatever the LRU pushes out keeps its file alive through active reads.
            if let Some((evicted, _)) = self.handles.push(path.clone(), cached) {
                log::trace!("Closing cached handle for '{}'", evicted);
            }
        }
        self.dedicated.remove(path)
    }

    pub(crate) fn is_dedicated(&self, path: &RequestPath) -> bool {
        self.dedicated.contains(path)
    }

    pub(crate) fn open_paths(&self) -> impl Iterator<Item = &RequestPath> {
        self.pinned.keys().chain(self.handles.iter().map(|(path, _)| path))
    }

    pub(crate) fn capacity(&self) -> usize {
        self.handles.cap().get()
    }

    pub(crate) fn open_time(&self) -> &TimedAverageWindow<64> {
        &self.open_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn files(count: usize) -> (tempfile::TempDir, Vec<RequestPath>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = (0..count)
            .map(|i| {
                let name = format!("f{}.bin", i);
                fs::write(dir.path().join(&name), vec![i as u8; 10 + i]).unwrap();
                RequestPath::from_root(dir.path(), name).unwrap()
            })
            .collect();
        (dir, paths)
    }

    fn is_file(acquired: Acquired) -> bool {
        matches!(acquired, Acquired::File(_))
    }

    #[test]
    fn test_reuse_and_size() {
        let (_dir, paths) = files(1);
        let mut cache = FileCache::new(2);
        assert!(is_file(cache.acquire(&paths[0], false)));
        assert!(is_file(cache.acquire(&paths[0], false)));
        assert_eq!(cache.open_paths().count(), 1);
        assert_eq!(cache.file_size(&paths[0]), Some(10));
    }

    #[test]
    fn test_busy_handles_block_eviction() {
        let (_dir, paths) = files(3);
        let mut cache = FileCache::new(2);
        assert!(is_file(cache.acquire(&paths[0], false)));
        assert!(is_file(cache.acquire(&paths[1], false)));
        assert!(matches!(cache.acquire(&paths[2], false), Acquired::CacheFull));

        cache.release(&paths[0]);
        assert!(is_file(cache.acquire(&paths[2], false)));
        assert!(!cache.contains(&paths[0]));
        assert!(cache.contains(&paths[1]));
    }

    #[test]
    fn test_dedicated_is_never_evicted() {
        let (_dir, paths) = files(3);
        let mut cache = FileCache::new(1);
        cache.create_dedicated(paths[0].clone());
        assert!(is_file(cache.acquire(&paths[0], false)));
        cache.release(&paths[0]);
        assert!(is_file(cache.acquire(&paths[1], false)));
        cache.release(&paths[1]);
        assert!(is_file(cache.acquire(&paths[2], false)));
        assert!(cache.contains(&paths[0]));
        assert!(!cache.contains(&paths[1]));
        assert_eq!(cache.open_paths().count(), 2);
        cache.release(&paths[2]);
        assert!(cache.destroy_dedicated(&paths[0]));
        assert!(!cache.is_dedicated(&paths[0]));
    }

    #[test]
    fn test_dedicated_adopts_and_returns_open_handle() {
        let (_dir, paths) = files(2);
        let mut cache = FileCache::new(1);
        assert!(is_file(cache.acquire(&paths[0], false)));
        cache.release(&paths[0]);
        cache.create_dedicated(paths[0].clone());
        // The LRU is empty again, so another file opens without evicting.
        assert!(is_file(cache.acquire(&paths[1], false)));
        assert!(cache.contains(&paths[0]));

        cache.release(&paths[1]);
        assert!(cache.destroy_dedicated(&paths[0]));
        assert!(cache.contains(&paths[0]));
        assert!(!cache.contains(&paths[1]));
    }

    #[test]
    fn test_missing_file_fails_and_flush() {
        let (dir, paths) = files(1);
        let mut cache = FileCache::new(1);
        let missing = RequestPath::from_root(dir.path(), "missing.bin").unwrap();
        assert!(matches!(cache.acquire(&missing, false), Acquired::Failed(_)));
        assert!(is_file(cache.acquire(&paths[0], false)));
        assert!(cache.flush(&paths[0]));
        assert!(!cache.flush(&paths[0]));
        cache.release(&paths[0]);
        cache.flush_all();
        assert_eq!(cache.open_paths().count(), 0);
        assert_eq!(cache.capacity(), 1);
    }
}
