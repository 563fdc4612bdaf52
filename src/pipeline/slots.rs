//! Fixed pool of transfer buffers shared between the capture thread and consumers

use crate::audio::SAMPLE_SIZE_8;
use crate::video::FRAME_SIZE_RGB;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Number of transfer slots kept in flight
pub const SLOT_COUNT: usize = 8;

/// Size of a single transfer: one RGB frame followed by one audio chunk
pub const BUF_SIZE: usize = FRAME_SIZE_RGB + SAMPLE_SIZE_8;

struct Slot {
    data: UnsafeCell<Box<[u8]>>,
    /// Bytes delivered by the last reaped transfer
    received: AtomicUsize,
    /// Bumped when a transfer into this slot is reaped, and again when
    /// its next transfer reaches the head of the device queue
    generation: AtomicU64,
}

/// Ring of transfer buffers filled in place by the device link.
///
/// Buffers are written by the driver (or the capture thread) and read by
/// consumers without a lock. A consumer is only handed a slot index after
/// the transfer into it was reaped, and the next transfer into the same
/// slot does not start before the other `SLOT_COUNT - 1` transfers have
/// completed, which gives consumers several frame periods to copy out.
///
/// Transfers complete in ring order, so reaping slot `K - 1` means the
/// device is now writing slot `K`. [`SlotPool::complete`] bumps the
/// generation of both, and a reader of slot `K` still in
/// [`SlotPool::with_slot`] at that point gets `None`.
pub struct SlotPool {
    slots: Box<[Slot]>,
    capacity: usize,
}

// SAFETY: buffer contents are only reached through raw pointers handed to the
// device link and through `with_slot`, which validates the slot generation
// before its result is trusted. Metadata is atomic.
unsafe impl Sync for SlotPool {}
unsafe impl Send for SlotPool {}

impl SlotPool {
    /// Create the standard pool of `SLOT_COUNT` buffers of `BUF_SIZE` bytes
    pub fn new() -> Self {
        Self::with_capacity(SLOT_COUNT, BUF_SIZE)
    }

    /// Create a pool with a custom slot count and buffer size
    pub fn with_capacity(count: usize, capacity: usize) -> Self {
        let slots = (0..count.max(1))
            .map(|_| Slot {
                data: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
                received: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
            })
            .collect();

        Self { slots, capacity }
    }

    /// Number of slots in the ring
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false, a pool holds at least one slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Capacity of each slot buffer in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes delivered into `index` by its last reaped transfer
    pub fn received(&self, index: usize) -> usize {
        self.slots
            .get(index)
            .map(|s| s.received.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Generation counter of `index`
    pub fn generation(&self, index: usize) -> u64 {
        self.slots
            .get(index)
            .map(|s| s.generation.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Raw pointer to the buffer of `index`, for arming device reads.
    ///
    /// # Safety
    /// The pointer is valid for `capacity()` bytes for the lifetime of the
    /// pool. Callers must not create references that outlive a transfer and
    /// must only write while the slot is owned by an in-flight transfer.
    pub unsafe fn buffer_ptr(&self, index: usize) -> *mut u8 {
        (*self.slots[index].data.get()).as_mut_ptr()
    }

    /// Record a reaped transfer of `received` bytes into `index`.
    ///
    /// Also invalidates the following slot, whose transfer is now being
    /// written.
    pub fn complete(&self, index: usize, received: usize) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        slot.received
            .store(received.min(self.capacity), Ordering::Release);
        slot.generation.fetch_add(1, Ordering::AcqRel);

        let next = (index + 1) % self.slots.len();
        if next != index {
            self.slots[next].generation.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Forget received byte counts (on a fresh connection)
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.received.store(0, Ordering::Release);
        }
    }

    /// Run `f` over the delivered bytes of `index`.
    ///
    /// Returns `None` if the index is out of range or if the slot was reaped
    /// again while `f` was reading it, in which case the result may mix two
    /// transfers and must be discarded.
    pub fn with_slot<R>(&self, index: usize, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let slot = self.slots.get(index)?;
        let generation = slot.generation.load(Ordering::Acquire);
        let received = slot.received.load(Ordering::Acquire).min(self.capacity);

        // SAFETY: the pointer covers `capacity` bytes and `received` is clamped
        // to it. The device writes a slot only after the previous slot was
        // reaped, which bumps this generation; checked below.
        let bytes = unsafe {
            let ptr = (*slot.data.get()).as_ptr();
            std::slice::from_raw_parts(ptr, received)
        };

        let result = f(bytes);

        (slot.generation.load(Ordering::Acquire) == generation).then_some(result)
    }
}

impl Default for SlotPool {
    fn default() -> Self {
        Self::new()
    }
}
