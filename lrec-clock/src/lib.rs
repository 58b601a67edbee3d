//! # lrec-clock
//!
//! Purpose: Abstract monotonic time behind a small trait so the rest of the
//! workspace can run against a real, host-backed clock in production and a
//! virtual, test-driven clock in `#[test]`s, without duplicating scheduling
//! logic between the two.
//!
//! ## Design Principles
//! 1. **One Scheduler, Two Clocks**: `Scheduler` is written once against the
//!    `Clock` trait; it works unmodified under `RealClock` and `VirtualClock`
//!    because both implement the same blocking `sleep_nanos`.
//! 2. **Never Advance Implicitly**: `VirtualClock` only moves forward when a
//!    test calls `move_time_forward`; nothing in this crate calls it for you.
//! 3. **Background Threads Are Owned**: every spawned thread has a stop flag
//!    and is joined on shutdown, never detached.

mod real;
mod scheduler;
mod virtual_clock;

pub use real::RealClock;
pub use scheduler::{Scheduler, TaskHandle};
pub use virtual_clock::VirtualClock;

use std::sync::Arc;

/// Monotonic time source consumed by the estimator, pause detector, and
/// recorder. All durations are in nanoseconds.
pub trait Clock: Send + Sync {
    /// Current monotonic time in nanoseconds, not tied to wall-clock epoch.
    fn now_nanos(&self) -> u64;

    /// Current monotonic time in milliseconds, used only for histogram
    /// start/end timestamps (`hdrhistogram` stamps those in milliseconds).
    fn now_millis(&self) -> u64 {
        self.now_nanos() / 1_000_000
    }

    /// Blocks the calling thread for approximately `nanos` nanoseconds.
    ///
    /// Under `RealClock` this is `std::thread::sleep`. Under `VirtualClock`
    /// it parks on a condition variable until a test calls
    /// `move_time_forward` far enough.
    fn sleep_nanos(&self, nanos: u64);
}

/// Convenience alias used at construction sites that need a shareable clock.
pub type SharedClock = Arc<dyn Clock>;
