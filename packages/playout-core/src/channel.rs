//! Per-channel state machine.
//!
//! A channel's legal states are modeled as a tagged enum so an illegal
//! configuration (e.g. two shadows, or a shadow with no live) simply cannot
//! be constructed. Slot construction/priming (which needs a decoder
//! factory and a sink) is the engine's job; this module owns the
//! transitions between states and the switch-to-live protocol's bookkeeping.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::clock::MasterClock;
use crate::error::{EngineError, EngineResult};
use crate::slot::{ChannelSlot, SlotStatus};

pub enum ChannelState {
    Empty,
    LiveOnly(Arc<ChannelSlot>),
    LivePlusShadow(Arc<ChannelSlot>, Arc<ChannelSlot>),
    Stopped,
    Errored(String),
}

impl ChannelState {
    fn label(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::LiveOnly(_) => "live_only",
            Self::LivePlusShadow(_, _) => "live_plus_shadow",
            Self::Stopped => "stopped",
            Self::Errored(_) => "errored",
        }
    }
}

/// Outcome of a successful [`Channel::switch_to_live`] call, reported back
/// to the engine for telemetry and for handing join handles to the reaper.
pub struct SwitchReport {
    pub shadow_start_pts: i64,
    pub live_last_pts: Option<i64>,
    pub live_last_duration: Option<i64>,
    /// `true` if `shadow_start_pts` picks up exactly where live left off.
    pub contiguous: bool,
    pub retired_join_handles: Vec<JoinHandle<()>>,
}

pub struct Channel {
    id: i32,
    state: Mutex<ChannelState>,
    last_switch_contiguous: Mutex<Option<bool>>,
}

impl Channel {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            state: Mutex::new(ChannelState::Empty),
            last_switch_contiguous: Mutex::new(None),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Whether the most recent `switch_to_live` on this channel was
    /// contiguous. `None` if this channel has never switched.
    pub fn last_switch_contiguous(&self) -> Option<bool> {
        *self.last_switch_contiguous.lock()
    }

    pub fn state_label(&self) -> &'static str {
        self.state.lock().label()
    }

    /// The live slot, if any. Cheap clone of the `Arc`; callers read its
    /// status independently of the channel lock.
    pub fn live_slot(&self) -> Option<Arc<ChannelSlot>> {
        match &*self.state.lock() {
            ChannelState::LiveOnly(live) | ChannelState::LivePlusShadow(live, _) => Some(Arc::clone(live)),
            _ => None,
        }
    }

    pub fn shadow_slot(&self) -> Option<Arc<ChannelSlot>> {
        match &*self.state.lock() {
            ChannelState::LivePlusShadow(_, shadow) => Some(Arc::clone(shadow)),
            _ => None,
        }
    }

    /// Transitions `Empty -> LiveOnly(live)`. `live` must already be primed
    /// and activated by the caller before this call.
    pub fn start(&self, live: Arc<ChannelSlot>) -> EngineResult<()> {
        let mut state = self.state.lock();
        match &*state {
            ChannelState::Empty => {
                *state = ChannelState::LiveOnly(live);
                Ok(())
            }
            _ => Err(EngineError::AlreadyExists(self.id)),
        }
    }

    /// Transitions `LiveOnly(live) -> LivePlusShadow(live, shadow)`, or, if a
    /// shadow is already attached, replaces it: the previous shadow is
    /// aborted and its join handles are returned for the caller to hand to a
    /// reaper. `shadow` must already be primed (but not activated) by the
    /// caller in both cases.
    pub fn attach_shadow(&self, shadow: Arc<ChannelSlot>) -> EngineResult<Vec<JoinHandle<()>>> {
        let mut state = self.state.lock();
        match &*state {
            ChannelState::LiveOnly(live) => {
                *state = ChannelState::LivePlusShadow(Arc::clone(live), shadow);
                Ok(Vec::new())
            }
            ChannelState::LivePlusShadow(live, old_shadow) => {
                let retired = old_shadow.abort();
                *state = ChannelState::LivePlusShadow(Arc::clone(live), shadow);
                Ok(retired)
            }
            _ => Err(EngineError::BadState(self.id)),
        }
    }

    /// Runs the switch-to-live protocol: peeks the shadow's pending frame,
    /// rebases its pacing to emit starting now, promotes it to live, and
    /// retires the old live slot (non-blocking abort; join handles are
    /// returned for the caller to hand to a reaper).
    pub fn switch_to_live(&self, clock: &dyn MasterClock) -> EngineResult<SwitchReport> {
        let mut state = self.state.lock();
        let (live, shadow) = match &*state {
            ChannelState::LivePlusShadow(live, shadow) => (Arc::clone(live), Arc::clone(shadow)),
            _ => return Err(EngineError::BadState(self.id)),
        };

        if shadow.status() != SlotStatus::Streaming {
            return Err(EngineError::NotReady(self.id));
        }
        let shadow_start_pts = shadow
            .peek_pending_pts()
            .ok_or(EngineError::NotReady(self.id))?;
        let (live_last_pts, live_last_duration) = match live.last_emitted_pts_and_duration() {
            Some((p, d)) => (Some(p), Some(d)),
            None => (None, None),
        };
        let contiguous = match (live_last_pts, live_last_duration) {
            (Some(p), Some(d)) => shadow_start_pts == p + d,
            _ => false,
        };
        if !contiguous {
            log::warn!(
                "channel {}: switch is non-contiguous (live ended at {:?}, shadow starts at {})",
                self.id,
                live_last_pts.zip(live_last_duration).map(|(p, d)| p + d),
                shadow_start_pts
            );
        }

        let base_ns_new = clock.now();
        let activated_pts = shadow.activate(base_ns_new)?;
        debug_assert_eq!(activated_pts, shadow_start_pts);

        let retired_join_handles = live.abort();
        *state = ChannelState::LiveOnly(shadow);
        *self.last_switch_contiguous.lock() = Some(contiguous);

        Ok(SwitchReport {
            shadow_start_pts,
            live_last_pts,
            live_last_duration,
            contiguous,
            retired_join_handles,
        })
    }

    /// Updates the plan handle on the live slot without touching its pipeline.
    pub fn update_plan(&self, plan_handle: String) -> EngineResult<()> {
        let state = self.state.lock();
        match &*state {
            ChannelState::LiveOnly(live) | ChannelState::LivePlusShadow(live, _) => {
                live.set_plan_handle(plan_handle);
                Ok(())
            }
            _ => Err(EngineError::BadState(self.id)),
        }
    }

    /// Aborts every slot the channel currently holds and transitions to
    /// `Stopped`. Returns join handles for the caller to hand to a reaper.
    /// A no-op (idempotent) on a channel that is already `Stopped` or `Empty`.
    pub fn stop(&self) -> Vec<JoinHandle<()>> {
        let mut state = self.state.lock();
        let handles = match &*state {
            ChannelState::LiveOnly(live) => live.abort(),
            ChannelState::LivePlusShadow(live, shadow) => {
                let mut handles = live.abort();
                handles.extend(shadow.abort());
                handles
            }
            ChannelState::Empty | ChannelState::Stopped | ChannelState::Errored(_) => Vec::new(),
        };
        *state = ChannelState::Stopped;
        handles
    }

    pub fn mark_errored(&self, reason: String) {
        *self.state.lock() = ChannelState::Errored(reason);
    }
}
