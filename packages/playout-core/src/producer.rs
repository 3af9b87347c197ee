//! The producer side of a slot's pipeline: a dedicated OS thread that drives
//! a [`DecoderPort`] and pushes frames onto a [`FrameRing`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::decoder::{DecodeOutcome, DecoderPort};
use crate::ring::FrameRing;

/// Shared, atomically-readable state a [`FrameProducer`] publishes for the
/// rest of the slot (and tests) to observe without touching the decoder.
#[derive(Default)]
pub struct ProducerHandle {
    frames_produced: AtomicU64,
    ring_full_events: AtomicU64,
    decode_errors: AtomicU64,
    stop: AtomicBool,
    eof: AtomicBool,
    fatal: parking_lot::Mutex<Option<String>>,
}

impl ProducerHandle {
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Acquire)
    }

    pub fn ring_full_events(&self) -> u64 {
        self.ring_full_events.load(Ordering::Acquire)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Acquire)
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    /// Non-blocking stop request; the producer thread observes this at the
    /// top of its next iteration, bounded by at most one decode-and-backoff cycle.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Owns the decoder and the thread that drives it.
pub struct FrameProducer {
    handle: Arc<ProducerHandle>,
    thread: Option<JoinHandle<()>>,
}

impl FrameProducer {
    pub fn handle(&self) -> Arc<ProducerHandle> {
        Arc::clone(&self.handle)
    }

    /// Opens `asset_uri` on `decoder` and spawns the producer thread, which
    /// runs until EOF, a fatal decode error, or a stop request.
    pub fn start(
        mut decoder: Box<dyn DecoderPort>,
        asset_uri: String,
        ring: Arc<FrameRing>,
        min_backoff_ms: u64,
    ) -> Result<Self, String> {
        decoder.open(&asset_uri)?;
        let handle = Arc::new(ProducerHandle::default());
        let thread_handle = Arc::clone(&handle);
        let backoff = Duration::from_millis(min_backoff_ms.max(1));

        let thread = std::thread::Builder::new()
            .name(format!("playout-producer-{asset_uri}"))
            .spawn(move || {
                loop {
                    if thread_handle.stop_requested() {
                        break;
                    }
                    match decoder.decode_next_into(&ring) {
                        DecodeOutcome::Pushed => {
                            thread_handle.frames_produced.fetch_add(1, Ordering::AcqRel);
                        }
                        DecodeOutcome::RingFull => {
                            thread_handle.ring_full_events.fetch_add(1, Ordering::AcqRel);
                            std::thread::sleep(backoff);
                        }
                        DecodeOutcome::Eof => {
                            thread_handle.eof.store(true, Ordering::Release);
                            ring.close();
                            break;
                        }
                        DecodeOutcome::TransientError(msg) => {
                            thread_handle.decode_errors.fetch_add(1, Ordering::AcqRel);
                            log::warn!("transient decode error on {asset_uri}: {msg}");
                            std::thread::sleep(backoff);
                        }
                        DecodeOutcome::FatalError(msg) => {
                            log::error!("fatal decode error on {asset_uri}: {msg}");
                            *thread_handle.fatal.lock() = Some(msg);
                            ring.close();
                            break;
                        }
                    }
                }
                decoder.close();
            })
            .map_err(|e| format!("failed to spawn producer thread: {e}"))?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn request_stop(&self) {
        self.handle.request_stop();
    }

    /// Takes ownership of the join handle so the caller can hand it to a
    /// background reaper instead of blocking here.
    pub fn take_join_handle(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }
}
