//! Factories that wire [`playout_core`] up to concrete decoder and sink
//! implementations at process start. The workspace ships only a synthetic
//! decoder and a logging sink; a real deployment swaps these factories for
//! ones backed by an actual codec and encoder without touching the core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use playout_core::{DecoderFactory, DecoderPort, FrameSink, SinkFactory, SyntheticDecoder};

/// Builds a [`SyntheticDecoder`] for any `synthetic://` asset URI. The
/// fragment after `synthetic://` is ignored; every synthetic asset decodes
/// an unbounded stream of 33ms-duration frames at roughly 30fps, which is
/// enough to exercise priming, pacing and switch-to-live without a real
/// media file on disk.
pub struct SyntheticDecoderFactory;

impl DecoderFactory for SyntheticDecoderFactory {
    fn build(&self, _asset_uri: &str) -> Box<dyn DecoderPort> {
        Box::new(SyntheticDecoder::new(0, 3_000, 30.0, None))
    }
}

/// A [`FrameSink`] standing in for the downstream encoder/renderer, which is
/// out of scope for this process. Logs a line every `log_every` frames so a
/// channel's progress is visible without flooding the log at full frame rate.
pub struct LoggingSink {
    channel_id: i32,
    log_every: u64,
    emitted: Arc<AtomicU64>,
}

impl LoggingSink {
    fn new(channel_id: i32, log_every: u64) -> Self {
        Self {
            channel_id,
            log_every,
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl FrameSink for LoggingSink {
    fn emit(&mut self, frame: &playout_core::Frame) -> Result<(), String> {
        let count = self.emitted.fetch_add(1, Ordering::AcqRel) + 1;
        if count % self.log_every == 0 {
            log::debug!(
                "[Channel {}] emitted frame pts={} ({} total)",
                self.channel_id,
                frame.pts,
                count
            );
        }
        Ok(())
    }
}

pub struct LoggingSinkFactory {
    pub log_every: u64,
}

impl SinkFactory for LoggingSinkFactory {
    fn build(&self, channel_id: i32) -> Box<dyn FrameSink> {
        Box::new(LoggingSink::new(channel_id, self.log_every.max(1)))
    }
}
