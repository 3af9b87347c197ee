//! A channel slot: one decoder, one ring, one consumer, wired together and
//! driven through the priming / streaming / draining lifecycle described in
//! the engine's component design. A [`crate::channel::Channel`] holds one or
//! two of these (live, and optionally a shadow being primed for a switch).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::MasterClock;
use crate::consumer::{ConsumerHandle, FrameConsumer, FrameSink};
use crate::decoder::DecoderPort;
use crate::error::{EngineError, EngineResult};
use crate::producer::{FrameProducer, ProducerHandle};
use crate::ring::FrameRing;

/// Where a slot is in its lifecycle. `Streaming` describes pipeline health
/// (past the ready threshold, no fatal error) for both a live slot and a
/// suppressed shadow slot — whether frames actually reach the sink is
/// controlled separately, by [`ConsumerHandle::is_emitting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Idle,
    Priming,
    Streaming,
    Draining,
    Closed,
    Errored(String),
}

impl SlotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Priming => "priming",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Errored(_) => "errored",
        }
    }
}

pub struct ChannelSlot {
    channel_id: i32,
    asset_uri: String,
    plan_handle: Mutex<String>,
    ring: Arc<FrameRing>,
    producer: Mutex<FrameProducer>,
    consumer: Mutex<FrameConsumer>,
    status: Mutex<SlotStatus>,
}

impl ChannelSlot {
    /// Builds and starts the producer and consumer threads for `asset_uri`.
    /// The slot begins in rehearsal (non-emitting) mode regardless of
    /// whether it will end up live or shadow; promotion is an explicit
    /// [`ChannelSlot::activate`] call.
    pub fn spawn(
        channel_id: i32,
        asset_uri: String,
        plan_handle: String,
        decoder: Box<dyn DecoderPort>,
        sink: Box<dyn FrameSink>,
        clock: Arc<dyn MasterClock>,
        ring_capacity: usize,
        timebase_num: u32,
        timebase_den: u32,
        min_backoff_ms: u64,
        poll_interval_ms: u64,
    ) -> EngineResult<Self> {
        let ring = Arc::new(FrameRing::new(ring_capacity));
        let producer = FrameProducer::start(decoder, asset_uri.clone(), Arc::clone(&ring), min_backoff_ms)
            .map_err(EngineError::Internal)?;
        let consumer = FrameConsumer::start(
            Arc::clone(&ring),
            clock,
            sink,
            timebase_num,
            timebase_den,
            poll_interval_ms,
            format!("{channel_id}:{asset_uri}"),
        );
        Ok(Self {
            channel_id,
            asset_uri,
            plan_handle: Mutex::new(plan_handle),
            ring,
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            status: Mutex::new(SlotStatus::Idle),
        })
    }

    pub fn asset_uri(&self) -> &str {
        &self.asset_uri
    }

    pub fn plan_handle(&self) -> String {
        self.plan_handle.lock().clone()
    }

    pub fn set_plan_handle(&self, plan_handle: String) {
        *self.plan_handle.lock() = plan_handle;
    }

    pub fn status(&self) -> SlotStatus {
        self.status.lock().clone()
    }

    fn producer_handle(&self) -> Arc<ProducerHandle> {
        self.producer.lock().handle()
    }

    fn consumer_handle(&self) -> Arc<ConsumerHandle> {
        self.consumer.lock().handle()
    }

    pub fn frames_produced(&self) -> u64 {
        self.producer_handle().frames_produced()
    }

    pub fn is_emitting(&self) -> bool {
        self.consumer_handle().is_emitting()
    }

    /// Sets `status` unless the slot has already been torn down by
    /// `abort`/`drain`, so a priming loop racing against a concurrent abort
    /// can never stomp `Closed`/`Draining`/`Errored` back to `Streaming`.
    fn set_status_unless_terminal(&self, new_status: SlotStatus) {
        let mut status = self.status.lock();
        if !matches!(*status, SlotStatus::Closed | SlotStatus::Draining) {
            *status = new_status;
        }
    }

    /// Blocks (polling, not held under any channel lock by the caller —
    /// this method itself holds no long-term lock) until the slot's
    /// producer has buffered `ready_threshold` frames, the decoder hits EOF
    /// first (a short asset fully buffered counts as ready), or a fatal
    /// decode error / timeout occurs.
    pub fn prime(&self, ready_threshold: usize, priming_timeout: Duration) -> EngineResult<()> {
        self.set_status_unless_terminal(SlotStatus::Priming);
        let producer_handle = self.producer_handle();
        let start = Instant::now();
        loop {
            if matches!(*self.status.lock(), SlotStatus::Closed | SlotStatus::Draining) {
                return Err(EngineError::BadState(self.channel_id));
            }
            if let Some(err) = producer_handle.fatal_error() {
                self.set_status_unless_terminal(SlotStatus::Errored(err.clone()));
                return Err(EngineError::SlotErrored(self.channel_id, err));
            }
            let produced = producer_handle.frames_produced() as usize;
            if produced >= ready_threshold {
                self.set_status_unless_terminal(SlotStatus::Streaming);
                return Ok(());
            }
            if producer_handle.is_eof() {
                // Asset is shorter than ready_threshold; it can never do
                // better than what it already produced.
                self.set_status_unless_terminal(SlotStatus::Streaming);
                return Ok(());
            }
            if start.elapsed() >= priming_timeout {
                self.set_status_unless_terminal(SlotStatus::Errored("priming timed out".to_string()));
                return Err(EngineError::Timeout(self.channel_id));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Runs [`ChannelSlot::prime`] to `ready_threshold` on a dedicated
    /// thread instead of the caller's. Used for a shadow slot: `load_preview`
    /// only needs to observe the first decoded frame before returning (see
    /// `wait_for_frames`), but the slot still has to climb
    /// `Idle -> Priming -> Streaming` on its own so a later `switch_to_live`
    /// can gate on `status() == SlotStatus::Streaming`.
    pub fn spawn_background_prime(slot: Arc<Self>, ready_threshold: usize, priming_timeout: Duration) {
        let channel_id = slot.channel_id;
        std::thread::Builder::new()
            .name(format!("playout-primer-{channel_id}"))
            .spawn(move || {
                if let Err(e) = slot.prime(ready_threshold, priming_timeout) {
                    log::warn!("channel {channel_id}: background priming of shadow slot did not complete: {e}");
                }
            })
            .expect("failed to spawn background primer thread");
    }

    /// Polls (without touching `status`) until the producer has produced at
    /// least `min_frames`, the decoder hits EOF, or `timeout` elapses.
    /// Lighter-weight than `prime`: used to compute `load_preview`'s
    /// `shadow_decode_started` flag, which per spec only needs to observe
    /// the first frame, not the full `ready_threshold`.
    pub fn wait_for_frames(&self, min_frames: u64, timeout: Duration) -> bool {
        let producer_handle = self.producer_handle();
        let start = Instant::now();
        loop {
            if producer_handle.frames_produced() >= min_frames {
                return true;
            }
            if producer_handle.fatal_error().is_some() || producer_handle.is_eof() {
                return producer_handle.frames_produced() >= min_frames;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Peeks the frame currently pending in this slot's consumer, the same
    /// frame [`ChannelSlot::activate`] would promote.
    pub fn peek_pending_pts(&self) -> Option<i64> {
        self.consumer_handle().upcoming().map(|m| m.pts)
    }

    /// Rebases the slot's pacing so its currently pending frame emits at
    /// `first_emit_at_ns`, then switches it into emitting mode. Returns the
    /// pts of the first frame that will be emitted.
    pub fn activate(&self, first_emit_at_ns: u64) -> EngineResult<i64> {
        self.consumer_handle()
            .activate(first_emit_at_ns)
            .ok_or(EngineError::NotReady(self.channel_id))
    }

    pub fn last_emitted_pts_and_duration(&self) -> Option<(i64, i64)> {
        self.consumer_handle().last_emitted().map(|m| (m.pts, m.duration))
    }

    pub fn frame_gap_events(&self) -> u64 {
        self.consumer_handle().gap_events()
    }

    /// Most recently observed frame gap, in seconds, or `0.0` if none has
    /// been observed yet.
    pub fn last_frame_gap_seconds(&self) -> f64 {
        let handle = self.consumer_handle();
        let (num, den) = handle.timebase();
        let ticks = handle.last_gap_ticks();
        if den == 0 {
            return 0.0;
        }
        ticks as f64 * num as f64 / den as f64
    }

    pub fn frames_emitted(&self) -> u64 {
        self.consumer_handle().frames_emitted()
    }

    pub fn ring_full_events(&self) -> u64 {
        self.producer_handle().ring_full_events()
    }

    pub fn decode_errors(&self) -> u64 {
        self.producer_handle().decode_errors()
    }

    /// Lets the producer run to EOF and the consumer drain whatever is left
    /// in the ring, then marks the slot `Draining`. Returns the join
    /// handles for a reaper to collect in the background; does not block.
    pub fn drain(&self) -> Vec<JoinHandle<()>> {
        *self.status.lock() = SlotStatus::Draining;
        self.producer.lock().request_stop();
        self.ring.close();
        self.consumer.lock().request_stop();
        self.take_join_handles()
    }

    /// Stops both threads immediately, discarding any frames still buffered
    /// in the ring. Returns the join handles for a reaper to collect.
    pub fn abort(&self) -> Vec<JoinHandle<()>> {
        {
            let mut status = self.status.lock();
            if !matches!(*status, SlotStatus::Errored(_)) {
                *status = SlotStatus::Closed;
            }
        }
        self.producer.lock().request_stop();
        self.ring.close();
        self.consumer.lock().request_abort();
        self.take_join_handles()
    }

    fn take_join_handles(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);
        if let Some(h) = self.producer.lock().take_join_handle() {
            handles.push(h);
        }
        if let Some(h) = self.consumer.lock().take_join_handle() {
            handles.push(h);
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::consumer::CountingSink;
    use crate::decoder::SyntheticDecoder;
    use std::sync::atomic::AtomicU64;

    fn spawn_test_slot(frame_count: Option<u64>, ready_threshold: usize) -> (ChannelSlot, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        let decoder = Box::new(SyntheticDecoder::new(0, 1_000, 0.0, frame_count));
        let sink = Box::new(CountingSink { count: Arc::clone(&count) });
        let clock: Arc<dyn MasterClock> = Arc::new(TestClock::new());
        let slot = ChannelSlot::spawn(
            1,
            "synthetic://slot-test".to_string(),
            "plan-a".to_string(),
            decoder,
            sink,
            clock,
            16,
            1,
            1,
            1,
            1,
        )
        .unwrap();
        let _ = ready_threshold;
        (slot, count)
    }

    #[test]
    fn prime_reports_streaming_once_threshold_reached() {
        let (slot, _count) = spawn_test_slot(None, 4);
        slot.prime(4, Duration::from_secs(2)).unwrap();
        assert_eq!(slot.status(), SlotStatus::Streaming);
        assert!(slot.frames_produced() >= 4);
    }

    #[test]
    fn prime_succeeds_on_short_asset_below_threshold() {
        let (slot, _count) = spawn_test_slot(Some(2), 10);
        slot.prime(10, Duration::from_secs(2)).unwrap();
        assert_eq!(slot.status(), SlotStatus::Streaming);
    }

    #[test]
    fn activate_before_any_frame_is_buffered_is_not_ready() {
        let count = Arc::new(AtomicU64::new(0));
        // target_fps high enough that the first frame isn't instantly ready.
        let decoder = Box::new(SyntheticDecoder::new(0, 1_000, 0.0, Some(0)));
        let sink = Box::new(CountingSink { count });
        let clock: Arc<dyn MasterClock> = Arc::new(TestClock::new());
        let slot = ChannelSlot::spawn(
            1,
            "synthetic://empty".to_string(),
            "plan-a".to_string(),
            decoder,
            sink,
            clock,
            16,
            1,
            1,
            1,
            1,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(slot.activate(0), Err(EngineError::NotReady(1))));
    }
}
