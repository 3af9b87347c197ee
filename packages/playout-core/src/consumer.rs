//! The consumer side of a slot's pipeline: a dedicated OS thread that pops
//! frames off a [`FrameRing`], paces them against a [`MasterClock`], and
//! either delivers them to a sink (live) or silently discards them
//! (suppressed shadow rehearsal).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::MasterClock;
use crate::ring::{Frame, FrameMeta, FrameRing};

/// Where a consumer sends frames once it is in the emitting state.
pub trait FrameSink: Send {
    fn emit(&mut self, frame: &Frame) -> Result<(), String>;
}

/// A sink that counts what it receives; used by the server's RPC adapter
/// stand-in and by tests that only care about emission counts, not actual
/// pixel delivery.
pub struct CountingSink {
    pub count: Arc<AtomicU64>,
}

impl FrameSink for CountingSink {
    fn emit(&mut self, _frame: &Frame) -> Result<(), String> {
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

const NO_FRAME: i64 = i64::MIN;

/// Shared, atomically-readable state a [`FrameConsumer`] publishes.
pub struct ConsumerHandle {
    stop: AtomicBool,
    abort: AtomicBool,
    emitting: AtomicBool,
    anchor_ns: AtomicU64,
    timebase_num: u32,
    timebase_den: u32,
    upcoming_pts: AtomicI64,
    upcoming_duration: AtomicI64,
    last_emitted_pts: AtomicI64,
    last_emitted_duration: AtomicI64,
    frames_emitted: AtomicU64,
    frames_discarded: AtomicU64,
    gap_events: AtomicU64,
    last_gap_ticks: AtomicI64,
}

impl ConsumerHandle {
    fn new(timebase_num: u32, timebase_den: u32) -> Self {
        Self {
            stop: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            emitting: AtomicBool::new(false),
            anchor_ns: AtomicU64::new(0),
            timebase_num,
            timebase_den,
            upcoming_pts: AtomicI64::new(NO_FRAME),
            upcoming_duration: AtomicI64::new(0),
            last_emitted_pts: AtomicI64::new(NO_FRAME),
            last_emitted_duration: AtomicI64::new(0),
            frames_emitted: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            gap_events: AtomicU64::new(0),
            last_gap_ticks: AtomicI64::new(0),
        }
    }

    /// Timebase this consumer paces against, for converting
    /// [`ConsumerHandle::last_gap_ticks`] into seconds.
    pub fn timebase(&self) -> (u32, u32) {
        (self.timebase_num, self.timebase_den)
    }

    /// Gap, in timebase ticks, observed on the most recent emission that had
    /// one. `0` if no gap has ever been observed.
    pub fn last_gap_ticks(&self) -> i64 {
        self.last_gap_ticks.load(Ordering::Acquire)
    }

    /// The frame currently held by the consumer thread, awaiting its pacing
    /// deadline. This is what the switch protocol reads as "the shadow's
    /// next frame" — it is the frame about to be emitted or discarded next,
    /// not some arbitrary lookahead.
    pub fn upcoming(&self) -> Option<FrameMeta> {
        let pts = self.upcoming_pts.load(Ordering::Acquire);
        if pts == NO_FRAME {
            return None;
        }
        Some(FrameMeta {
            pts,
            dts: pts,
            duration: self.upcoming_duration.load(Ordering::Acquire),
        })
    }

    pub fn last_emitted(&self) -> Option<FrameMeta> {
        let pts = self.last_emitted_pts.load(Ordering::Acquire);
        if pts == NO_FRAME {
            return None;
        }
        Some(FrameMeta {
            pts,
            dts: pts,
            duration: self.last_emitted_duration.load(Ordering::Acquire),
        })
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Acquire)
    }

    pub fn frames_discarded(&self) -> u64 {
        self.frames_discarded.load(Ordering::Acquire)
    }

    pub fn gap_events(&self) -> u64 {
        self.gap_events.load(Ordering::Acquire)
    }

    pub fn is_emitting(&self) -> bool {
        self.emitting.load(Ordering::Acquire)
    }

    /// Rebases the consumer's pacing timeline so that the frame currently
    /// held as `upcoming` is scheduled to emit at wall-clock time
    /// `first_emit_at_ns`, then switches the consumer into the emitting
    /// state. Returns the pts of that frame, or `None` if no frame is
    /// currently pending (the caller should treat this as not-ready).
    pub fn activate(&self, first_emit_at_ns: u64) -> Option<i64> {
        let pending_pts = self.upcoming_pts.load(Ordering::Acquire);
        if pending_pts == NO_FRAME {
            return None;
        }
        let offset_ns = (pending_pts as i128 * self.timebase_num as i128 * 1_000_000_000i128)
            / self.timebase_den as i128;
        let anchor = (first_emit_at_ns as i128 - offset_ns).max(0) as u64;
        self.anchor_ns.store(anchor, Ordering::Release);
        self.emitting.store(true, Ordering::Release);
        Some(pending_pts)
    }

    /// Non-blocking: lets the consumer finish draining buffered frames
    /// before its thread exits.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Non-blocking: the consumer thread exits at the top of its next
    /// iteration without processing any further buffered frames.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }
}

pub struct FrameConsumer {
    handle: Arc<ConsumerHandle>,
    thread: Option<JoinHandle<()>>,
}

impl FrameConsumer {
    pub fn handle(&self) -> Arc<ConsumerHandle> {
        Arc::clone(&self.handle)
    }

    /// Spawns the consumer thread in rehearsal mode (frames are discarded,
    /// not sent to `sink`) until [`ConsumerHandle::activate`] is called.
    pub fn start(
        ring: Arc<FrameRing>,
        clock: Arc<dyn MasterClock>,
        mut sink: Box<dyn FrameSink>,
        timebase_num: u32,
        timebase_den: u32,
        poll_interval_ms: u64,
        label: String,
    ) -> Self {
        let handle = Arc::new(ConsumerHandle::new(timebase_num, timebase_den));
        let thread_handle = Arc::clone(&handle);
        let poll = Duration::from_millis(poll_interval_ms.max(1));

        let thread = std::thread::Builder::new()
            .name(format!("playout-consumer-{label}"))
            .spawn(move || {
                loop {
                    if thread_handle.abort.load(Ordering::Acquire) {
                        break;
                    }
                    match ring.try_pop() {
                        None => {
                            if thread_handle.stop.load(Ordering::Acquire) {
                                break;
                            }
                            std::thread::sleep(poll);
                        }
                        Some(frame) => {
                            thread_handle.upcoming_pts.store(frame.pts, Ordering::Release);
                            thread_handle.upcoming_duration.store(frame.duration, Ordering::Release);

                            let deadline = clock.frame_deadline(
                                thread_handle.anchor_ns.load(Ordering::Acquire),
                                frame.pts,
                                timebase_num,
                                timebase_den,
                            );
                            clock.sleep_until(deadline);

                            if thread_handle.emitting.load(Ordering::Acquire) {
                                if let Some(last) = thread_handle.last_emitted() {
                                    if frame.pts > last.pts + last.duration {
                                        thread_handle.gap_events.fetch_add(1, Ordering::AcqRel);
                                        thread_handle
                                            .last_gap_ticks
                                            .store(frame.pts - (last.pts + last.duration), Ordering::Release);
                                        log::warn!(
                                            "{label}: frame gap detected, expected pts <= {}, got {}",
                                            last.pts + last.duration,
                                            frame.pts
                                        );
                                    }
                                }
                                if let Err(e) = sink.emit(&frame) {
                                    log::warn!("{label}: sink rejected frame pts={}: {e}", frame.pts);
                                }
                                thread_handle.last_emitted_pts.store(frame.pts, Ordering::Release);
                                thread_handle
                                    .last_emitted_duration
                                    .store(frame.duration, Ordering::Release);
                                thread_handle.frames_emitted.fetch_add(1, Ordering::AcqRel);
                            } else {
                                thread_handle.frames_discarded.fetch_add(1, Ordering::AcqRel);
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn consumer thread");

        Self {
            handle,
            thread: Some(thread),
        }
    }

    pub fn request_stop(&self) {
        self.handle.request_stop();
    }

    pub fn request_abort(&self) {
        self.handle.request_abort();
    }

    pub fn take_join_handle(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::ring::PixelFormat;
    use bytes::Bytes;

    fn push_n(ring: &FrameRing, n: i64, duration: i64) {
        for i in 0..n {
            ring.try_push(Frame {
                pts: i * duration,
                dts: i * duration,
                duration,
                width: 4,
                height: 4,
                pixel_format: PixelFormat::Yuv420p,
                asset_uri: "test".to_string(),
                data: Bytes::from_static(b"x"),
            });
        }
    }

    #[test]
    fn rehearsal_discards_without_calling_sink() {
        let ring = Arc::new(FrameRing::new(8));
        push_n(&ring, 3, 1_000);
        ring.close();
        let clock: Arc<dyn MasterClock> = Arc::new(TestClock::new());
        let count = Arc::new(AtomicU64::new(0));
        let sink = Box::new(CountingSink { count: Arc::clone(&count) });
        let mut consumer = FrameConsumer::start(ring, clock, sink, 1, 1, 1, "rehearsal".to_string());
        let handle = consumer.handle();
        handle.request_stop();
        consumer.take_join_handle().unwrap().join().unwrap();
        assert_eq!(count.load(Ordering::Acquire), 0);
        assert_eq!(handle.frames_discarded(), 3);
    }

    #[test]
    fn activate_switches_to_emitting_and_reports_first_pts() {
        let ring = Arc::new(FrameRing::new(8));
        push_n(&ring, 1, 1_000);
        let clock: Arc<dyn MasterClock> = Arc::new(TestClock::new());
        let count = Arc::new(AtomicU64::new(0));
        let sink = Box::new(CountingSink { count: Arc::clone(&count) });
        let mut consumer = FrameConsumer::start(Arc::clone(&ring), Arc::clone(&clock), sink, 1, 1, 1, "live".to_string());
        let handle = consumer.handle();

        // Wait (bounded) for the consumer thread to pick up the pending frame.
        let mut spins = 0;
        while handle.upcoming().is_none() && spins < 1000 {
            std::thread::sleep(Duration::from_millis(1));
            spins += 1;
        }
        assert_eq!(handle.upcoming().unwrap().pts, 0);

        let first_pts = handle.activate(0).expect("a frame should be pending");
        assert_eq!(first_pts, 0);

        let mut spins = 0;
        while handle.frames_emitted() == 0 && spins < 1000 {
            std::thread::sleep(Duration::from_millis(1));
            spins += 1;
        }
        assert_eq!(count.load(Ordering::Acquire), 1);

        ring.close();
        handle.request_stop();
        consumer.take_join_handle().unwrap().join().unwrap();
    }
}
