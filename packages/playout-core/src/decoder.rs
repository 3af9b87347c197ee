//! Decoder abstraction. The engine only ever talks to a `DecoderPort`; a
//! real deployment plugs in a hardware or software codec behind it, tests
//! plug in [`SyntheticDecoder`].

use std::thread;
use std::time::Duration;

use bytes::Bytes;

use crate::ring::{Frame, FrameRing, PixelFormat};

/// Result of one decode attempt, reported back to the producer loop.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A frame was decoded and pushed onto the ring.
    Pushed,
    /// A frame was decoded but the ring had no free slot; the frame was
    /// dropped and the caller should back off before retrying.
    RingFull,
    /// The asset has no more frames.
    Eof,
    /// A recoverable decode failure (e.g. a corrupt frame in an otherwise
    /// healthy stream). The caller should back off and retry.
    TransientError(String),
    /// An unrecoverable decode failure. The caller must stop calling this
    /// decoder and surface the error.
    FatalError(String),
}

/// Decode statistics exposed for telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub transient_errors: u64,
}

/// A source of decoded frames for one asset.
///
/// Implementations are driven from a single dedicated producer thread; none
/// of these methods need to be `Sync`, only `Send`.
pub trait DecoderPort: Send {
    /// Opens the asset named by `asset_uri`. Called once before any
    /// `decode_next_into` call.
    fn open(&mut self, asset_uri: &str) -> Result<(), String>;

    /// Decodes the next frame and attempts to push it onto `ring`.
    fn decode_next_into(&mut self, ring: &FrameRing) -> DecodeOutcome;

    fn is_open(&self) -> bool;

    fn is_eof(&self) -> bool;

    fn stats(&self) -> DecoderStats;

    fn close(&mut self);
}

/// A deterministic decoder used by tests and by channels configured with a
/// synthetic asset URI. Produces frames with monotonically increasing PTS at
/// a fixed duration, pacing itself to `target_fps` wall-clock time so
/// producer backpressure and consumer pacing tests behave like a real
/// pipeline.
pub struct SyntheticDecoder {
    asset_uri: String,
    start_pts: i64,
    frame_duration_ticks: i64,
    frame_count_limit: Option<u64>,
    target_fps: f64,
    width: u32,
    height: u32,
    next_index: u64,
    open: bool,
    eof: bool,
    stats: DecoderStats,
    last_emit: Option<std::time::Instant>,
}

impl SyntheticDecoder {
    /// `frame_count_limit: None` means the asset never reaches EOF on its own.
    pub fn new(
        start_pts: i64,
        frame_duration_ticks: i64,
        target_fps: f64,
        frame_count_limit: Option<u64>,
    ) -> Self {
        Self {
            asset_uri: String::new(),
            start_pts,
            frame_duration_ticks,
            frame_count_limit,
            target_fps,
            width: 64,
            height: 64,
            next_index: 0,
            open: false,
            eof: false,
            stats: DecoderStats::default(),
            last_emit: None,
        }
    }

    fn pacing_delay(&self) -> Duration {
        if self.target_fps <= 0.0 {
            Duration::from_secs(0)
        } else {
            Duration::from_secs_f64(1.0 / self.target_fps)
        }
    }
}

impl DecoderPort for SyntheticDecoder {
    fn open(&mut self, asset_uri: &str) -> Result<(), String> {
        self.asset_uri = asset_uri.to_string();
        self.next_index = 0;
        self.eof = false;
        self.open = true;
        self.last_emit = None;
        Ok(())
    }

    fn decode_next_into(&mut self, ring: &FrameRing) -> DecodeOutcome {
        if !self.open {
            return DecodeOutcome::FatalError("decoder not open".to_string());
        }
        if self.eof {
            return DecodeOutcome::Eof;
        }
        if let Some(limit) = self.frame_count_limit {
            if self.next_index >= limit {
                self.eof = true;
                return DecodeOutcome::Eof;
            }
        }

        if let Some(delay) = self.last_emit.map(|_| self.pacing_delay()) {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }

        let pts = self.start_pts + self.next_index as i64 * self.frame_duration_ticks;
        // Deterministic luma ramp keyed off the frame index; chroma pinned
        // at 128 (mid-gray, no color) as a stand-in for real pixel data.
        let mut data = vec![(self.next_index % 256) as u8; (self.width * self.height * 3 / 2) as usize];
        let chroma_start = (self.width * self.height) as usize;
        for b in &mut data[chroma_start..] {
            *b = 128;
        }

        let frame = Frame {
            pts,
            dts: pts,
            duration: self.frame_duration_ticks,
            width: self.width,
            height: self.height,
            pixel_format: PixelFormat::Yuv420p,
            asset_uri: self.asset_uri.clone(),
            data: Bytes::from(data),
        };

        if ring.try_push(frame) {
            self.next_index += 1;
            self.stats.frames_decoded += 1;
            self.last_emit = Some(std::time::Instant::now());
            DecodeOutcome::Pushed
        } else {
            DecodeOutcome::RingFull
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_monotonically_increasing_pts() {
        let ring = FrameRing::new(16);
        let mut decoder = SyntheticDecoder::new(0, 3_000, 0.0, Some(5));
        decoder.open("synthetic://unit-test").unwrap();
        let mut last_pts = None;
        for _ in 0..5 {
            match decoder.decode_next_into(&ring) {
                DecodeOutcome::Pushed => {}
                other => panic!("expected Pushed, got {other:?}"),
            }
        }
        for _ in 0..5 {
            let frame = ring.try_pop().unwrap();
            if let Some(p) = last_pts {
                assert!(frame.pts > p);
            }
            last_pts = Some(frame.pts);
        }
        assert!(matches!(decoder.decode_next_into(&ring), DecodeOutcome::Eof));
        assert!(decoder.is_eof());
    }

    #[test]
    fn reports_ring_full_without_dropping_decoder_state() {
        let ring = FrameRing::new(2);
        let mut decoder = SyntheticDecoder::new(0, 1_000, 0.0, None);
        decoder.open("synthetic://unit-test").unwrap();
        assert!(matches!(decoder.decode_next_into(&ring), DecodeOutcome::Pushed));
        assert!(matches!(decoder.decode_next_into(&ring), DecodeOutcome::Pushed));
        assert!(matches!(decoder.decode_next_into(&ring), DecodeOutcome::RingFull));
        ring.try_pop();
        assert!(matches!(decoder.decode_next_into(&ring), DecodeOutcome::Pushed));
    }
}
