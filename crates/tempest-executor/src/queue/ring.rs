//! Lock-free bounded ring storage backing [`BatchQueue`](super::BatchQueue).
//!
//! Single-producer single-consumer by construction: [`BatchQueue`] serializes
//! all publishers behind one lock, so exactly one thread pushes and exactly
//! one (the event-handler) pops. Capacity is a power of two so index wrap is
//! a bitmask; head and tail live on separate cache lines.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pads a value to a 64-byte cache line to prevent false sharing.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Wraps `value` in its own cache line.
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Bounded SPSC ring buffer with runtime capacity.
///
/// One slot is reserved to distinguish full from empty, so a ring created
/// with capacity `n` holds at most `n - 1` items.
pub struct RingBuffer<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Consumer index; only the consumer thread stores to it.
    head: CachePadded<AtomicUsize>,
    /// Producer index; only the (serialized) producer side stores to it.
    tail: CachePadded<AtomicUsize>,
    capacity_mask: usize,
}

// SAFETY: the producer side is serialized by BatchQueue's publisher lock and
// the consumer side is a single thread, so slots are never accessed
// concurrently for the same index.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Creates a ring with at least `capacity` slots, rounded up to a power
    /// of two.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let capacity = capacity.next_power_of_two();

        let buffer: Vec<UnsafeCell<MaybeUninit<T>>> = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            capacity_mask: capacity - 1,
        }
    }

    /// Total slot count (one slot stays unused).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity_mask + 1
    }

    /// Snapshot of the current item count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.wrapping_sub(head) & self.capacity_mask
    }

    /// Snapshot emptiness check.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Relaxed)
    }

    /// Snapshot fullness check.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        self.next_index(tail) == head
    }

    /// Pushes an item, returning it back if the ring is full.
    ///
    /// Must only be called from the serialized producer side.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next_tail = self.next_index(tail);

        if next_tail == self.head.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: the slot at `tail` is unpublished (tail not yet advanced)
        // and the consumer never reads past the published tail.
        unsafe {
            (*self.buffer[tail].get()).write(item);
        }

        self.tail.store(next_tail, Ordering::Release);
        Ok(())
    }

    /// Pops the oldest item, or `None` when empty.
    ///
    /// Must only be called from the single consumer thread.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);

        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `head < tail`, so this slot was published by the producer
        // and will not be overwritten until head advances past it.
        let item = unsafe { (*self.buffer[head].get()).assume_init_read() };

        self.head.store(self.next_index(head), Ordering::Release);
        Some(item)
    }

    #[inline]
    const fn next_index(&self, index: usize) -> usize {
        (index + 1) & self.capacity_mask
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
