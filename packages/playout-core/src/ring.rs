//! Frame payloads and the single-producer/single-consumer ring that moves
//! them from decoder to pacer without a lock.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;

/// Pixel layout of a decoded frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit planar YUV 4:2:0, the format the synthetic decoder emits.
    Yuv420p,
    /// Packed 32-bit RGBA.
    Rgba8,
}

/// One decoded video frame plus the metadata the pacer and switch protocol need.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Presentation timestamp, in the asset's timebase ticks.
    pub pts: i64,
    /// Decode timestamp, in the asset's timebase ticks. Equal to `pts` for
    /// formats without B-frame reordering.
    pub dts: i64,
    /// Nominal duration of this frame, in timebase ticks.
    pub duration: i64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Identifies which asset this frame was decoded from, for telemetry
    /// and log correlation across a switch.
    pub asset_uri: String,
    pub data: Bytes,
}

/// The subset of [`Frame`] fields needed to compute a deadline or report a
/// switch point, without taking ownership of the frame's payload.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
}

impl Frame {
    pub fn meta(&self) -> FrameMeta {
        FrameMeta {
            pts: self.pts,
            dts: self.dts,
            duration: self.duration,
        }
    }
}

/// A lock-free bounded ring buffer with exactly one producer and one consumer.
///
/// `head` and `tail` are monotonically increasing slot counters, not wrapped
/// indices; the physical slot is `index & mask`. The producer only ever
/// writes `tail` and reads `head`; the consumer only ever writes `head` and
/// reads `tail`. The `Release`/`Acquire` pairing on the index that changes
/// ownership of a slot is what makes this safe without a lock: a consumer
/// that observes an updated `tail` is guaranteed to observe the frame data
/// written before that store.
pub struct FrameRing {
    capacity: usize,
    mask: usize,
    buffer: Box<[UnsafeCell<MaybeUninit<Frame>>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    closed: AtomicBool,
}

// SAFETY: access to each slot is exclusive to whichever side currently owns
// it, established by the head/tail handoff protocol described above.
unsafe impl Sync for FrameRing {}

impl FrameRing {
    /// Builds a ring of the given capacity, which must be a non-zero power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity.is_power_of_two(), "ring capacity must be a non-zero power of two");
        let mut buffer = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buffer.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Self {
            capacity,
            mask: capacity - 1,
            buffer: buffer.into_boxed_slice(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently buffered. Advisory only when called from
    /// a thread other than producer or consumer.
    pub fn used(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head)
    }

    /// Producer-side only. Attempts to push a frame; returns `false` if the
    /// ring is full or closed, without blocking.
    pub fn try_push(&self, frame: Frame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.capacity {
            return false;
        }
        let idx = tail & self.mask;
        unsafe {
            (*self.buffer[idx].get()).write(frame);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer-side only. Pops the oldest buffered frame, if any.
    pub fn try_pop(&self) -> Option<Frame> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = head & self.mask;
        let frame = unsafe { (*self.buffer[idx].get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(frame)
    }

    /// Consumer-side only. Reads the metadata of the oldest buffered frame
    /// without removing it.
    pub fn peek_meta(&self) -> Option<FrameMeta> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = head & self.mask;
        let frame_ref = unsafe { (*self.buffer[idx].get()).assume_init_ref() };
        Some(frame_ref.meta())
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the ring closed. Further `try_push` calls fail; already
    /// buffered frames remain poppable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        // Drain any frames left in the ring so their `Bytes`/`String` payloads
        // run their own destructors instead of leaking.
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(pts: i64) -> Frame {
        Frame {
            pts,
            dts: pts,
            duration: 1_000,
            width: 16,
            height: 16,
            pixel_format: PixelFormat::Yuv420p,
            asset_uri: "test://asset".to_string(),
            data: Bytes::from_static(b"frame"),
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let ring = FrameRing::new(4);
        for i in 0..4 {
            assert!(ring.try_push(test_frame(i * 1_000)));
        }
        for i in 0..4 {
            let frame = ring.try_pop().expect("frame should be present");
            assert_eq!(frame.pts, i * 1_000);
        }
        assert!(ring.try_pop().is_none());
    }

    #[test]
    fn push_fails_when_full() {
        let ring = FrameRing::new(2);
        assert!(ring.try_push(test_frame(0)));
        assert!(ring.try_push(test_frame(1)));
        assert!(!ring.try_push(test_frame(2)));
        assert_eq!(ring.used(), 2);
    }

    #[test]
    fn wraps_around_correctly() {
        let ring = FrameRing::new(2);
        for i in 0..10 {
            assert!(ring.try_push(test_frame(i)));
            let popped = ring.try_pop().expect("should pop what was just pushed");
            assert_eq!(popped.pts, i);
        }
    }

    #[test]
    fn peek_does_not_remove() {
        let ring = FrameRing::new(4);
        ring.try_push(test_frame(42));
        assert_eq!(ring.peek_meta().unwrap().pts, 42);
        assert_eq!(ring.peek_meta().unwrap().pts, 42);
        assert_eq!(ring.try_pop().unwrap().pts, 42);
    }

    #[test]
    fn closed_ring_rejects_push_but_keeps_buffered_frames() {
        let ring = FrameRing::new(4);
        ring.try_push(test_frame(1));
        ring.close();
        assert!(!ring.try_push(test_frame(2)));
        assert_eq!(ring.try_pop().unwrap().pts, 1);
    }
}
