//! # Ring Buffer Module
//!
//! Fixed-capacity slot ring used to hand decoded frames from a pipeline
//! callback thread to the capture thread, and converted frames from the
//! capture engine to its caller.
//!
//! ## Overview
//!
//! - **Producer**: peeks the next free slot, fills it, commits it. Never blocks
//!   on a reader; on wraparound the oldest frame is overwritten.
//! - **Consumer**: takes the most recently committed frame, at most once, or
//!   walks committed frames in order.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ peek_write/commit ┌──────────────────────┐ take_latest_once ┌──────────────┐
//! │   Pipeline   │──────────────────▶│ slot 0 │ slot 1 │ .. │─────────────────▶│   Capture    │
//! │  (producer)  │                   └──────────────────────┘    read_next     │  (consumer)  │
//! └──────────────┘                      per-slot RwLock                        └──────────────┘
//! ```
//!
//! Each slot sits behind its own `Arc<RwLock<_>>`. Write and read handles own
//! an `Arc` guard, so a reallocation swaps in new slots without freeing memory
//! a writer or reader still holds. The cursor mutex is only held for constant
//! time bookkeeping, and slot locks are only taken with `try_*`, so the
//! producer path never waits for the consumer.
//!
//! ## Allocation Modes
//!
//! - [`AllocMode::Owned`]: heap memory per slot.
//! - [`AllocMode::ZeroCopy`]: each slot is a memory map over its own temporary
//!   file, the same backing the capture path has always used for shared frame
//!   memory.
//!
//! ## Example
//!
//! ```rust
//! use cap_color::ImageFormat;
//! use stream_capture::core::ring_buffer::{AllocMode, FrameInfo, RingBuffer};
//!
//! let ring = RingBuffer::new();
//! ring.allocate(4, 16, AllocMode::Owned).unwrap();
//!
//! let info = FrameInfo::new(4, 4, ImageFormat::Gray8);
//! let mut slot = ring.peek_write().unwrap();
//! slot.as_mut_slice().fill(7);
//! slot.commit(16, info);
//!
//! let frame = ring.take_latest_once().unwrap();
//! assert_eq!(&frame[..], &[7u8; 16][..]);
//! assert!(ring.take_latest_once().is_none());
//! ```

use std::ops::Deref;
use std::sync::Arc;

use cap_color::ImageFormat;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::debug;

use crate::error::{CaptureError, CaptureResult};

/// How slot memory is obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocMode {
    /// Heap memory owned by the slot. Producers copy data in.
    Owned,
    /// File-backed shared mapping, addressable outside this process.
    ZeroCopy,
}

impl AllocMode {
    pub fn from_zero_copy(zero_copy: bool) -> Self {
        if zero_copy {
            AllocMode::ZeroCopy
        } else {
            AllocMode::Owned
        }
    }
}

/// Parameters of the current allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocSpec {
    pub capacity: usize,
    pub element_size: usize,
    pub mode: AllocMode,
}

/// Geometry of the frame stored in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl FrameInfo {
    pub fn new(width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }
}

/// Counters describing ring usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    pub element_size: usize,
    pub mode: Option<AllocMode>,
    /// Reallocations performed, including the first.
    pub generation: u64,
    /// Total commits across all allocations.
    pub commits: u64,
    /// Frames served by `take_latest_once`.
    pub latest_reads: u64,
}

#[derive(Debug)]
enum SlotMemory {
    Owned(Vec<u8>),
    Mapped(MmapMut),
}

impl SlotMemory {
    fn allocate(mode: AllocMode, size: usize) -> CaptureResult<Self> {
        match mode {
            AllocMode::Owned => {
                let mut bytes = Vec::new();
                bytes.try_reserve_exact(size).map_err(|e| {
                    CaptureError::allocation("ring slot", e.to_string())
                        .with_metadata("bytes", size.to_string())
                })?;
                bytes.resize(size, 0);
                Ok(SlotMemory::Owned(bytes))
            }
            AllocMode::ZeroCopy => {
                let map_err = |e: std::io::Error| {
                    CaptureError::allocation("mapped ring slot", e.to_string())
                        .with_metadata("bytes", size.to_string())
                };
                let file = tempfile::tempfile().map_err(map_err)?;
                file.set_len(size as u64).map_err(map_err)?;
                // The file is private to this mapping and never truncated.
                let map = unsafe { MmapOptions::new().len(size).map_mut(&file) }.map_err(map_err)?;
                Ok(SlotMemory::Mapped(map))
            }
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            SlotMemory::Owned(bytes) => bytes,
            SlotMemory::Mapped(map) => map,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            SlotMemory::Owned(bytes) => bytes,
            SlotMemory::Mapped(map) => map,
        }
    }
}

/// One frame's worth of memory plus what was last written into it.
#[derive(Debug)]
pub struct Slot {
    memory: SlotMemory,
    len: usize,
    info: FrameInfo,
}

impl Slot {
    fn new(memory: SlotMemory) -> Self {
        Self {
            memory,
            len: 0,
            info: FrameInfo::new(0, 0, ImageFormat::Gray8),
        }
    }
}

type SharedSlot = Arc<RwLock<Slot>>;

#[derive(Debug, Default)]
struct Cursors {
    spec: Option<AllocSpec>,
    generation: u64,
    slots: Vec<SharedSlot>,
    /// Commit sequence per slot. Zero marks an empty or in-progress slot.
    seqs: Vec<u64>,
    write: usize,
    latest: Option<usize>,
    written: u64,
    last_read: u64,
    read_seq: u64,
    latest_reads: u64,
}

/// Single-producer single-consumer ring of frame slots with drop-oldest
/// semantics.
#[derive(Debug, Default)]
pub struct RingBuffer {
    inner: Mutex<Cursors>,
}

impl RingBuffer {
    /// Creates an empty ring. Nothing can be written until [`allocate`](Self::allocate).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the ring for `capacity` slots of `element_size` bytes.
    ///
    /// Calling again with the same parameters is a no-op. Different parameters
    /// discard every committed frame and bump the generation; handles into the
    /// old slots stay valid until dropped, and commits through them are
    /// discarded.
    ///
    /// # Errors
    ///
    /// [`CaptureError::Allocation`] if `capacity` or `element_size` is zero, or
    /// if slot memory cannot be obtained.
    pub fn allocate(&self, capacity: usize, element_size: usize, mode: AllocMode) -> CaptureResult<()> {
        if capacity == 0 || element_size == 0 {
            return Err(CaptureError::allocation(
                "ring buffer",
                format!("cannot allocate {capacity} slots of {element_size} bytes"),
            ));
        }
        let spec = AllocSpec {
            capacity,
            element_size,
            mode,
        };
        if self.inner.lock().spec == Some(spec) {
            return Ok(());
        }

        let slots = (0..capacity)
            .map(|_| SlotMemory::allocate(mode, element_size).map(|m| Arc::new(RwLock::new(Slot::new(m)))))
            .collect::<CaptureResult<Vec<_>>>()?;

        let mut cursors = self.inner.lock();
        cursors.spec = Some(spec);
        cursors.generation += 1;
        cursors.slots = slots;
        cursors.seqs = vec![0; capacity];
        cursors.write = 0;
        cursors.latest = None;
        debug!(capacity, element_size, ?mode, generation = cursors.generation, "ring buffer allocated");
        Ok(())
    }

    /// Current allocation parameters, `None` before the first allocation.
    pub fn spec(&self) -> Option<AllocSpec> {
        self.inner.lock().spec
    }

    pub fn stats(&self) -> RingStats {
        let cursors = self.inner.lock();
        RingStats {
            capacity: cursors.spec.map_or(0, |s| s.capacity),
            element_size: cursors.spec.map_or(0, |s| s.element_size),
            mode: cursors.spec.map(|s| s.mode),
            generation: cursors.generation,
            commits: cursors.written,
            latest_reads: cursors.latest_reads,
        }
    }

    /// Exclusive access to the next writable slot. Never blocks.
    ///
    /// Slots held by a reader are skipped. Returns `None` when the ring is
    /// unallocated or every slot is held.
    pub fn peek_write(&self) -> Option<WriteSlot<'_>> {
        let mut cursors = self.inner.lock();
        let n = cursors.slots.len();
        for step in 0..n {
            let index = (cursors.write + step) % n;
            if let Some(guard) = cursors.slots[index].try_write_arc() {
                // The old contents are about to be overwritten.
                cursors.seqs[index] = 0;
                if cursors.latest == Some(index) {
                    cursors.latest = None;
                }
                return Some(WriteSlot {
                    ring: self,
                    guard,
                    index,
                    generation: cursors.generation,
                });
            }
        }
        None
    }

    /// The most recently committed frame, if it has not been returned before.
    pub fn take_latest_once(&self) -> Option<SlotRef> {
        let mut cursors = self.inner.lock();
        let index = cursors.latest?;
        let sequence = cursors.seqs[index];
        if sequence == 0 || sequence <= cursors.last_read {
            return None;
        }
        let guard = cursors.slots[index].try_read_arc()?;
        cursors.last_read = sequence;
        cursors.latest_reads += 1;
        Some(SlotRef { guard, sequence })
    }

    /// The oldest committed frame newer than the last one this cursor
    /// returned. Frames overwritten before being read are skipped.
    pub fn read_next(&self) -> Option<SlotRef> {
        let mut cursors = self.inner.lock();
        let floor = cursors.read_seq;
        let (index, sequence) = cursors
            .seqs
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, seq)| seq > floor)
            .min_by_key(|&(_, seq)| seq)?;
        let guard = cursors.slots[index].try_read_arc()?;
        cursors.read_seq = sequence;
        Some(SlotRef { guard, sequence })
    }
}

/// Exclusive write access to one slot, obtained from [`RingBuffer::peek_write`].
///
/// Dropping it without committing leaves the slot empty.
pub struct WriteSlot<'a> {
    ring: &'a RingBuffer,
    guard: ArcRwLockWriteGuard<RawRwLock, Slot>,
    index: usize,
    generation: u64,
}

impl WriteSlot<'_> {
    /// The whole slot, `element_size` bytes long.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.guard.memory.as_mut_slice()
    }

    pub fn capacity(&self) -> usize {
        self.guard.memory.as_slice().len()
    }

    /// Copies `data` into the slot, truncating to the slot size. Returns the
    /// number of bytes copied.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let dst = self.as_mut_slice();
        let n = data.len().min(dst.len());
        dst[..n].copy_from_slice(&data[..n]);
        n
    }

    /// Publishes the first `len` bytes as the newest frame.
    ///
    /// Returns the commit sequence, or `None` if the ring was reallocated
    /// while this slot was held.
    pub fn commit(self, len: usize, info: FrameInfo) -> Option<u64> {
        let WriteSlot {
            ring,
            mut guard,
            index,
            generation,
        } = self;
        let capacity = guard.memory.as_slice().len();
        guard.len = len.min(capacity);
        guard.info = info;
        drop(guard);

        let mut cursors = ring.inner.lock();
        if cursors.generation != generation {
            debug!(index, generation, "discarding commit into a replaced allocation");
            return None;
        }
        cursors.written += 1;
        let sequence = cursors.written;
        cursors.seqs[index] = sequence;
        cursors.latest = Some(index);
        cursors.write = (index + 1) % cursors.slots.len();
        Some(sequence)
    }
}

/// Shared read access to a committed frame.
///
/// While held, the producer skips this slot and a reallocation keeps its
/// memory alive.
pub struct SlotRef {
    guard: ArcRwLockReadGuard<RawRwLock, Slot>,
    sequence: u64,
}

impl SlotRef {
    pub fn info(&self) -> FrameInfo {
        self.guard.info
    }

    pub fn width(&self) -> u32 {
        self.guard.info.width
    }

    pub fn height(&self) -> u32 {
        self.guard.info.height
    }

    pub fn format(&self) -> ImageFormat {
        self.guard.info.format
    }

    /// Commit sequence number, strictly increasing per ring.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Deref for SlotRef {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard.memory.as_slice()[..self.guard.len]
    }
}

impl AsRef<[u8]> for SlotRef {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRef")
            .field("sequence", &self.sequence)
            .field("info", &self.guard.info)
            .field("len", &self.guard.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> FrameInfo {
        FrameInfo::new(10, 10, ImageFormat::Gray8)
    }

    fn push(ring: &RingBuffer, value: u8, len: usize) -> Option<u64> {
        let mut slot = ring.peek_write()?;
        slot.as_mut_slice()[..len].fill(value);
        slot.commit(len, info())
    }

    #[test]
    fn test_latest_wins_after_wraparound() {
        let ring = RingBuffer::new();
        ring.allocate(4, 100, AllocMode::Owned).unwrap();
        for value in 1..=5u8 {
            assert!(push(&ring, value, 100).is_some());
        }

        let frame = ring.take_latest_once().unwrap();
        assert_eq!(frame.len(), 100);
        assert!(frame.iter().all(|&b| b == 5));
        assert_eq!(frame.sequence(), 5);
        drop(frame);

        assert!(ring.take_latest_once().is_none());
    }

    #[test]
    fn test_take_latest_once_sees_new_commit() {
        let ring = RingBuffer::new();
        ring.allocate(2, 8, AllocMode::Owned).unwrap();
        assert!(ring.take_latest_once().is_none());

        push(&ring, 1, 8);
        assert_eq!(ring.take_latest_once().unwrap()[0], 1);
        push(&ring, 2, 8);
        assert_eq!(ring.take_latest_once().unwrap()[0], 2);
        assert_eq!(ring.stats().latest_reads, 2);
    }

    #[test]
    fn test_oldest_frame_is_overwritten() {
        let ring = RingBuffer::new();
        ring.allocate(3, 4, AllocMode::Owned).unwrap();
        for value in 1..=4u8 {
            push(&ring, value, 4);
        }

        let mut seen = Vec::new();
        while let Some(frame) = ring.read_next() {
            seen.push(frame[0]);
        }
        assert_eq!(seen, vec![2, 3, 4]);
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let ring = RingBuffer::new();
        ring.allocate(4, 32, AllocMode::Owned).unwrap();
        push(&ring, 9, 32);
        ring.allocate(4, 32, AllocMode::Owned).unwrap();

        assert_eq!(ring.stats().generation, 1);
        assert_eq!(ring.take_latest_once().unwrap()[0], 9);
    }

    #[test]
    fn test_reallocate_discards_frames() {
        let ring = RingBuffer::new();
        ring.allocate(4, 32, AllocMode::Owned).unwrap();
        push(&ring, 9, 32);
        ring.allocate(4, 64, AllocMode::Owned).unwrap();

        assert!(ring.take_latest_once().is_none());
        assert_eq!(ring.stats().generation, 2);
        assert_eq!(ring.spec().unwrap().element_size, 64);
    }

    #[test]
    fn test_zero_sized_allocation_fails() {
        let ring = RingBuffer::new();
        let err = ring.allocate(0, 16, AllocMode::Owned).unwrap_err();
        assert_eq!(err.category(), "allocation");
        assert!(ring.allocate(4, 0, AllocMode::ZeroCopy).is_err());
        assert!(ring.spec().is_none());
        assert!(ring.peek_write().is_none());
    }

    #[test]
    fn test_writer_skips_slot_held_by_reader() {
        let ring = RingBuffer::new();
        ring.allocate(2, 4, AllocMode::Owned).unwrap();
        push(&ring, 1, 4);
        let held = ring.take_latest_once().unwrap();

        // Slot 0 is held; the next two writes both land in slot 1.
        push(&ring, 2, 4);
        push(&ring, 3, 4);
        assert_eq!(held[0], 1);
        drop(held);

        assert_eq!(ring.take_latest_once().unwrap()[0], 3);
    }

    #[test]
    fn test_no_slot_when_all_held() {
        let ring = RingBuffer::new();
        ring.allocate(1, 4, AllocMode::Owned).unwrap();
        push(&ring, 1, 4);
        let _held = ring.take_latest_once().unwrap();
        assert!(ring.peek_write().is_none());
    }

    #[test]
    fn test_commit_into_replaced_allocation_is_discarded() {
        let ring = RingBuffer::new();
        ring.allocate(2, 4, AllocMode::Owned).unwrap();
        let mut slot = ring.peek_write().unwrap();
        slot.write(&[1, 2, 3, 4]);

        ring.allocate(2, 8, AllocMode::Owned).unwrap();
        assert_eq!(slot.commit(4, info()), None);
        assert!(ring.take_latest_once().is_none());
        assert_eq!(ring.stats().commits, 0);
    }

    #[test]
    fn test_reader_survives_reallocation() {
        let ring = RingBuffer::new();
        ring.allocate(2, 4, AllocMode::ZeroCopy).unwrap();
        push(&ring, 5, 4);
        let frame = ring.take_latest_once().unwrap();

        ring.allocate(8, 16, AllocMode::Owned).unwrap();
        assert_eq!(&frame[..], &[5, 5, 5, 5]);
        assert_eq!(frame.info(), info());
    }

    #[test]
    fn test_zero_copy_slots_are_writable() {
        let ring = RingBuffer::new();
        ring.allocate(3, 4096, AllocMode::ZeroCopy).unwrap();
        let mut slot = ring.peek_write().unwrap();
        assert_eq!(slot.capacity(), 4096);
        assert_eq!(slot.write(&[0xAB; 5000]), 4096);
        slot.commit(4096, info());

        let frame = ring.take_latest_once().unwrap();
        assert_eq!(frame.len(), 4096);
        assert!(frame.iter().all(|&b| b == 0xAB));
        assert_eq!(ring.stats().mode, Some(AllocMode::ZeroCopy));
    }

    #[test]
    fn test_commit_len_is_clamped() {
        let ring = RingBuffer::new();
        ring.allocate(1, 4, AllocMode::Owned).unwrap();
        let slot = ring.peek_write().unwrap();
        slot.commit(100, info());
        assert_eq!(ring.take_latest_once().unwrap().len(), 4);
    }
}
