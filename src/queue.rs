//! Single-producer / single-consumer frame ring.
//!
//! The edge interrupt fills the slot at `tail` and publishes it with a
//! release store; the cooperative loop consumes the slot at `head` after an
//! acquire load. Each index is written by exactly one side, so load/store
//! atomics are enough and the ring works on targets without CAS. All slots
//! are allocated up front; the interrupt never allocates. One slot is kept
//! empty to distinguish full from empty, and a full ring drops the newest
//! frame (documented loss under overload).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::frame::CecFrame;

/// Number of ring slots; usable capacity is one less.
pub(crate) const MAX_QUEUED: usize = 8;

pub(crate) struct FrameQueue<const N: usize = MAX_QUEUED> {
    slots: [UnsafeCell<CecFrame>; N],
    /// Next slot to read; owned by the consumer.
    head: AtomicUsize,
    /// Next slot to write; owned by the producer.
    tail: AtomicUsize,
}

// The producer writes only the slot at `tail` before publishing it, the
// consumer reads only slots the producer has published. Safe as long as
// there is exactly one producer context and one consumer context, which
// the crate enforces through the split interrupt/device handles.
unsafe impl<const N: usize> Sync for FrameQueue<N> {}

impl<const N: usize> FrameQueue<N> {
    pub(crate) fn new() -> Self {
        FrameQueue {
            slots: core::array::from_fn(|_| UnsafeCell::new(CecFrame::default())),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Enqueue from the producer side. Returns `false` (dropping the frame)
    /// when the ring is full.
    pub(crate) fn push(&self, frame: &CecFrame) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % N;
        if next == self.head.load(Ordering::Acquire) {
            return false;
        }
        unsafe { *self.slots[tail].get() = frame.clone() };
        self.tail.store(next, Ordering::Release);
        true
    }

    /// Dequeue from the consumer side.
    pub(crate) fn pop(&self) -> Option<CecFrame> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let frame = unsafe { (*self.slots[head].get()).clone() };
        self.head.store((head + 1) % N, Ordering::Release);
        Some(frame)
    }
}
