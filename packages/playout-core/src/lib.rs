//! Playout Core - per-channel decode/pace/switch engine for a broadcast
//! playout platform.
//!
//! This crate is the runtime heart of a video playout process: it turns an
//! abstract playout plan into a steady, timing-accurate stream of decoded
//! frames, with a dual-slot (live + shadow) model that lets a channel
//! pre-roll its next asset and cut over to it without a visible gap.
//!
//! # Architecture
//!
//! - [`clock`]: the process-wide [`clock::MasterClock`] abstraction all pacing is read through.
//! - [`ring`]: the [`ring::Frame`] payload type and the lock-free [`ring::FrameRing`] that moves frames from decoder to pacer.
//! - [`decoder`]: the [`decoder::DecoderPort`] capability interface, plus the [`decoder::SyntheticDecoder`] test/bring-up implementation.
//! - [`producer`]: the decode worker thread that drives a `DecoderPort` into a `FrameRing`.
//! - [`consumer`]: the pacing worker thread that pops frames under `MasterClock` control and hands them to a [`consumer::FrameSink`].
//! - [`slot`]: [`slot::ChannelSlot`], the producer+ring+consumer bundle for one asset.
//! - [`channel`]: [`channel::Channel`], the live/shadow state machine and switch-to-live protocol.
//! - [`engine`]: [`engine::PlayoutEngine`], the channel table and the five domain operations a process shell drives.
//! - [`telemetry`]: the narrow [`telemetry::MetricsSink`] trait the engine publishes gauges/counters through.
//! - [`error`]: the centralized [`error::EngineError`] taxonomy.
//! - [`config`]: [`config::EngineConfig`], the tunables every channel's slots are built from.

pub mod channel;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod producer;
pub mod ring;
pub mod slot;
pub mod telemetry;

pub use channel::{Channel, ChannelState, SwitchReport};
pub use clock::{MasterClock, RealClock, TestClock};
pub use config::EngineConfig;
pub use consumer::{FrameSink, FrameConsumer};
pub use decoder::{DecodeOutcome, DecoderPort, DecoderStats, SyntheticDecoder};
pub use engine::{AssetRef, ChannelSnapshot, DecoderFactory, PlayoutEngine, SinkFactory, SwitchSummary};
pub use error::{EngineError, EngineResult};
pub use producer::FrameProducer;
pub use ring::{Frame, FrameMeta, FrameRing, PixelFormat};
pub use slot::{ChannelSlot, SlotStatus};
pub use telemetry::{noop_sink, MetricsSink, NoopMetricsSink, SharedMetricsSink};
