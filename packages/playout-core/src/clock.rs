//! Master clock abstraction.
//!
//! Every paced component (the consumer, the switch protocol) reads time
//! through this trait instead of `std::time` directly, so tests can swap in
//! a [`TestClock`] that only advances when told to.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A monotonic nanosecond clock plus a blocking wait primitive.
///
/// `now()` and `sleep_until()` must agree on the same timeline: a deadline
/// computed from one `now()` reading is meaningful to `sleep_until` on the
/// same clock instance.
pub trait MasterClock: Send + Sync {
    /// Current time, in nanoseconds, on this clock's own arbitrary epoch.
    fn now(&self) -> u64;

    /// Blocks the calling thread until `now() >= deadline_ns`. Returns
    /// immediately if the deadline has already passed.
    fn sleep_until(&self, deadline_ns: u64);

    /// Wall-clock deadline for a frame with presentation timestamp
    /// `pts_ticks`, given a slot anchor `base_ns` (the wall-clock instant
    /// corresponding to `pts_ticks == 0`) and the asset's timebase.
    fn frame_deadline(&self, base_ns: u64, pts_ticks: i64, timebase_num: u32, timebase_den: u32) -> u64 {
        let offset_ns = (pts_ticks as i128 * timebase_num as i128 * 1_000_000_000i128)
            / timebase_den as i128;
        (base_ns as i128 + offset_ns).max(0) as u64
    }
}

/// Real monotonic clock backed by [`std::time::Instant`].
pub struct RealClock {
    epoch: Instant,
}

impl RealClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterClock for RealClock {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn sleep_until(&self, deadline_ns: u64) {
        let now = self.now();
        if deadline_ns > now {
            std::thread::sleep(Duration::from_nanos(deadline_ns - now));
        }
    }
}

/// A clock that only moves when [`TestClock::advance`] is called.
///
/// `sleep_until` blocks on a condvar until some other thread advances the
/// clock past the deadline, which is what makes pacing and switch-protocol
/// tests deterministic: nothing races real wall-clock time.
#[derive(Clone)]
pub struct TestClock {
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    /// Advances the clock by `nanos` and wakes any thread blocked in `sleep_until`.
    pub fn advance(&self, nanos: u64) {
        let (lock, cvar) = &*self.inner;
        let mut now = lock.lock();
        *now += nanos;
        cvar.notify_all();
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterClock for TestClock {
    fn now(&self) -> u64 {
        *self.inner.0.lock()
    }

    fn sleep_until(&self, deadline_ns: u64) {
        let (lock, cvar) = &*self.inner;
        let mut now = lock.lock();
        while *now < deadline_ns {
            cvar.wait(&mut now);
        }
    }
}
