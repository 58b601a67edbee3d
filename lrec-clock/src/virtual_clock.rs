//! Test-driven virtual clock.
//!
//! Time never advances on its own; a test calls `move_time_forward` and
//! every thread parked in `sleep_nanos` or `wait_until` past that point wakes
//! up. This lets timing-sensitive scenarios (estimator windows, time caps,
//! scheduler periods) run deterministically and instantly under `cargo test`.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::Clock;

struct Inner {
    now_nanos: Mutex<u64>,
    advanced: Condvar,
}

/// A `Clock` that only moves when a test tells it to.
#[derive(Clone)]
pub struct VirtualClock {
    inner: Arc<Inner>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// Creates a virtual clock starting at time zero.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a virtual clock starting at an arbitrary point, useful for
    /// scenarios that want round timestamps without starting at zero.
    pub fn starting_at(nanos: u64) -> Self {
        VirtualClock {
            inner: Arc::new(Inner {
                now_nanos: Mutex::new(nanos),
                advanced: Condvar::new(),
            }),
        }
    }

    /// Advances virtual time by `nanos` and wakes every parked waiter.
    ///
    /// This is the only way virtual time moves; nothing else in this crate
    /// calls it.
    pub fn move_time_forward(&self, nanos: u64) {
        let mut now = self.inner.now_nanos.lock();
        *now += nanos;
        self.inner.advanced.notify_all();
    }

    /// Blocks the calling thread until virtual time reaches `target_nanos`.
    pub fn wait_until(&self, target_nanos: u64) {
        let mut now = self.inner.now_nanos.lock();
        while *now < target_nanos {
            self.inner.advanced.wait(&mut now);
        }
    }
}

impl Clock for VirtualClock {
    fn now_nanos(&self) -> u64 {
        *self.inner.now_nanos.lock()
    }

    fn sleep_nanos(&self, nanos: u64) {
        let target = self.now_nanos() + nanos;
        self.wait_until(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn never_advances_on_its_own() {
        let clock = VirtualClock::new();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now_nanos(), 0);
    }

    #[test]
    fn move_time_forward_accumulates() {
        let clock = VirtualClock::new();
        clock.move_time_forward(100);
        clock.move_time_forward(50);
        assert_eq!(clock.now_nanos(), 150);
    }

    #[test]
    fn sleep_nanos_wakes_when_time_is_moved() {
        let clock = VirtualClock::new();
        let waiter = clock.clone();
        let handle = thread::spawn(move || {
            waiter.sleep_nanos(1_000);
            waiter.now_nanos()
        });

        // Give the waiter thread a chance to start blocking before the first
        // (insufficient) nudge.
        thread::sleep(Duration::from_millis(5));
        clock.move_time_forward(400);
        thread::sleep(Duration::from_millis(5));
        clock.move_time_forward(700);

        let woke_at = handle.join().unwrap();
        assert!(woke_at >= 1_000);
    }
}
