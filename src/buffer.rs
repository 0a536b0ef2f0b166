//! Buffers shared between callers, pipeline stages and worker threads.
//!
//! This module provides:
//!
//! - [`OutputBuffer`]: caller-owned destination memory for reads
//! - [`AlignedBuffer`]: sector-aligned scratch memory for unbuffered reads
//! - [`BufferTracker`]: accounting of bytes held by internal buffers
//! - alignment helpers used by the storage drive and the decompressor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Rounds `value` down to a multiple of `alignment` (a power of two).
#[inline]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Rounds `value` up to a multiple of `alignment` (a power of two).
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Returns true if `value` is a multiple of `alignment`.
#[inline]
pub fn is_aligned(value: u64, alignment: u64) -> bool {
    alignment != 0 && value % alignment == 0
}

/// Destination memory for a read request.
///
/// The buffer is shared between the caller and the pipeline: stages and worker
/// threads write into it, the caller inspects it once the request completed.
/// A read of `size` bytes only ever touches `[0, size)`.
///
/// # Example
///
/// ```rust
/// use stackio::OutputBuffer;
///
/// let buffer = OutputBuffer::filled(8, 0xAA);
/// assert_eq!(buffer.len(), 8);
/// assert_eq!(buffer.to_vec(), vec![0xAA; 8]);
/// ```
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Creates a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Creates a buffer of `len` bytes all set to `byte`.
    pub fn filled(len: usize, byte: u8) -> Self {
        Self::from_vec(vec![byte; len])
    }

    /// Wraps an existing vector.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(data)),
        }
    }

    /// Returns the size of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the buffer has no capacity for data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the current contents out of the buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Locks the buffer for direct access.
    ///
    /// A poisoned lock is recovered: the data is plain bytes and stays usable.
    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::warn!("OutputBuffer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Copies `data` to `offset`. Returns false if it doesn't fit.
    pub(crate) fn write_at(&self, offset: usize, data: &[u8]) -> bool {
        let mut buffer = self.lock();
        match offset.checked_add(data.len()) {
            Some(end) if end <= buffer.len() => {
                buffer[offset..end].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }

    /// Returns true if both handles refer to the same memory.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Thread-safe accounting of bytes held by internal buffers.
///
/// Stages use this to report how much scratch memory they hold; there is no
/// limit, the pipeline bounds memory through its slot counts instead.
#[derive(Debug, Default)]
pub struct BufferTracker {
    current_usage: AtomicUsize,
    peak_usage: AtomicUsize,
    allocations: AtomicUsize,
}

impl BufferTracker {
    /// Creates a tracker with no recorded usage.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the bytes currently held.
    pub fn current_usage(&self) -> usize {
        self.current_usage.load(Ordering::SeqCst)
    }

    /// Returns the largest amount of bytes held at once.
    pub fn peak_usage(&self) -> usize {
        self.peak_usage.load(Ordering::SeqCst)
    }

    /// Returns the number of allocations made through this tracker.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Records `bytes` as held until the returned guard is dropped.
    pub fn track(self: &Arc<Self>, bytes: usize) -> BufferGuard {
        let new_usage = self.current_usage.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak_usage.fetch_max(new_usage, Ordering::SeqCst);
        self.allocations.fetch_add(1, Ordering::SeqCst);
        BufferGuard {
            tracker: Arc::clone(self),
            bytes,
        }
    }

    fn release(&self, bytes: usize) {
        self.current_usage.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// RAII guard that releases tracked bytes when dropped.
#[derive(Debug)]
pub struct BufferGuard {
    tracker: Arc<BufferTracker>,
    bytes: usize,
}

impl BufferGuard {
    /// Returns the number of bytes held by this guard.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.tracker.release(self.bytes);
        }
    }
}

/// Heap memory whose first byte sits on an `alignment` boundary.
///
/// Over-allocates by `alignment` bytes and offsets into the allocation, so no
/// unsafe allocation calls are needed.
#[derive(Debug)]
pub struct AlignedBuffer {
    storage: Vec<u8>,
    start: usize,
    len: usize,
    _guard: Option<BufferGuard>,
}

impl AlignedBuffer {
    /// Allocates `len` zeroed bytes aligned to `alignment` (a power of two).
    pub fn new(len: usize, alignment: usize) -> Self {
        let alignment = alignment.max(1);
        debug_assert!(alignment.is_power_of_two());
        let storage = vec![0u8; len + alignment];
        let start = storage.as_ptr().align_offset(alignment).min(alignment);
        Self {
            storage,
            start,
            len,
            _guard: None,
        }
    }

    /// Allocates like [`AlignedBuffer::new`] and records the bytes in `tracker`.
    pub fn tracked(len: usize, alignment: usize, tracker: &Arc<BufferTracker>) -> Self {
        let mut buffer = Self::new(len, alignment);
        buffer._guard = Some(tracker.track(buffer.storage.len()));
        buffer
    }

    /// Returns the aligned bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.start..self.start + self.len]
    }

    /// Returns the aligned bytes mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.start..self.start + self.len]
    }

    /// Returns the length of the aligned region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the aligned region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_helpers() {
        assert_eq!(align_down(4097, 4096), 4096);
        assert_eq!(align_down(4096, 4096), 4096);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(0, 512), 0);
        assert!(is_aligned(8192, 4096));
        assert!(!is_aligned(8193, 4096));
        assert!(!is_aligned(10, 0));
    }

    #[test]
    fn test_output_buffer_write_at_bounds() {
        let buffer = OutputBuffer::new(4);
        assert!(buffer.write_at(1, &[1, 2, 3]));
        assert!(!buffer.write_at(2, &[1, 2, 3]));
        assert!(!buffer.write_at(usize::MAX, &[1]));
        assert_eq!(buffer.to_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_output_buffer_shared() {
        let a = OutputBuffer::new(2);
        let b = a.clone();
        assert!(b.write_at(0, &[9]));
        assert_eq!(a.to_vec()[0], 9);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&OutputBuffer::new(2)));
    }

    #[test]
    fn test_aligned_buffer_alignment() {
        for alignment in [1usize, 16, 512, 4096] {
            let mut buffer = AlignedBuffer::new(1000, alignment);
            assert_eq!(buffer.as_slice().as_ptr() as usize % alignment, 0);
            assert_eq!(buffer.len(), 1000);
            buffer.as_mut_slice()[999] = 7;
            assert_eq!(buffer.as_slice()[999], 7);
        }
    }

    #[test]
    fn test_tracker_guard_release() {
        let tracker = BufferTracker::new();
        let guard = tracker.track(100);
        assert_eq!(tracker.current_usage(), 100);
        let buffer = AlignedBuffer::tracked(10, 16, &tracker);
        assert_eq!(tracker.current_usage(), 100 + 10 + 16);
        drop(guard);
        drop(buffer);
        assert_eq!(tracker.current_usage(), 0);
        assert_eq!(tracker.peak_usage(), 126);
        assert_eq!(tracker.allocations(), 2);
    }
}
