//! Bounded slot tables of the decompressor.
//!
//! Both tables are only touched by the scheduling thread. The one handoff
//! to other threads is the compressed buffer, which moves from a read slot
//! into a decompression job when the job starts.

use std::time::Instant;

use crate::buffer::{BufferGuard, OutputBuffer};
use crate::request::RequestId;

/// State of a read slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadBufferStatus {
    Unused,
    ReadInFlight,
    PendingDecompression,
}

/// Compressed bytes read for one compressed request.
#[derive(Debug)]
pub(crate) struct ReadSlot {
    pub status: ReadBufferStatus,
    /// The `CompressedRead` this slot serves.
    pub request: Option<RequestId>,
    /// The archive read filling `buffer`.
    pub read: Option<RequestId>,
    /// Keeps the compressed request open until decompression finishes.
    pub wait: Option<RequestId>,
    pub buffer: Option<(OutputBuffer, BufferGuard)>,
    /// Distance from the aligned read start to the compressed data.
    pub offset_adjustment: u64,
    /// When the read finished.
    pub ready_since: Instant,
}

impl ReadSlot {
    fn unused() -> Self {
        Self {
            status: ReadBufferStatus::Unused,
            request: None,
            read: None,
            wait: None,
            buffer: None,
            offset_adjustment: 0,
            ready_since: Instant::now(),
        }
    }

    /// Returns the slot to `Unused`, dropping its buffer.
    pub fn reset(&mut self) {
        *self = Self::unused();
    }
}

/// A decompression running on the decompression pool.
#[derive(Debug)]
pub(crate) struct DecompressionTask {
    /// The `CompressedRead` being decompressed.
    pub request: RequestId,
    /// Completed with the outcome of the job.
    pub wait: RequestId,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// When the compressed bytes became available.
    pub queued: Instant,
    /// When the job was handed to the pool.
    pub dispatched: Instant,
    pub canceled: bool,
    /// Compressed bytes owned by the job, released when the job is finalized.
    pub _guard: BufferGuard,
}

#[derive(Debug)]
pub(crate) struct ReadSlots {
    slots: Vec<ReadSlot>,
}

impl ReadSlots {
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| ReadSlot::unused()).collect(),
        }
    }

    pub fn find_unused(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.status == ReadBufferStatus::Unused)
    }

    pub fn find_pending_decompression(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.status == ReadBufferStatus::PendingDecompression)
    }

    /// Finds the slot whose archive read is `read`.
    pub fn find_read(&self, read: RequestId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.status == ReadBufferStatus::ReadInFlight && slot.read == Some(read)
        })
    }

    pub fn count(&self, status: ReadBufferStatus) -> usize {
        self.slots.iter().filter(|slot| slot.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadSlot> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ReadSlot> {
        self.slots.iter_mut()
    }
}

impl std::ops::Index<usize> for ReadSlots {
    type Output = ReadSlot;

    fn index(&self, index: usize) -> &ReadSlot {
        &self.slots[index]
    }
}

impl std::ops::IndexMut<usize> for ReadSlots {
    fn index_mut(&mut self, index: usize) -> &mut ReadSlot {
        &mut self.slots[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferTracker;

    fn id(index: u32) -> RequestId {
        RequestId {
            index,
            generation: 0,
        }
    }

    #[test]
    fn test_slot_lifecycle() {
        let tracker = BufferTracker::new();
        let mut slots = ReadSlots::new(2);
        assert_eq!(slots.count(ReadBufferStatus::Unused), 2);

        let index = slots.find_unused().unwrap();
        let slot = &mut slots[index];
        slot.status = ReadBufferStatus::ReadInFlight;
        slot.read = Some(id(7));
        slot.buffer = Some((OutputBuffer::new(64), tracker.track(64)));
        assert_eq!(slots.find_read(id(7)), Some(index));
        assert_eq!(slots.find_read(id(8)), None);
        assert_eq!(tracker.current_usage(), 64);

        slots[index].status = ReadBufferStatus::PendingDecompression;
        assert_eq!(slots.find_pending_decompression(), Some(index));
        assert_eq!(slots.find_read(id(7)), None);

        slots[index].reset();
        assert_eq!(slots.count(ReadBufferStatus::Unused), slots.len());
        assert_eq!(tracker.current_usage(), 0);
    }
}
