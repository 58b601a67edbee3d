//! Host-backed monotonic clock.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::Clock;

/// Process-wide reference point. `Instant` itself has no stable "zero", so we
/// pin one the first time a `RealClock` is used and measure everything as an
/// offset from it.
fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// `Clock` implementation backed by the host's monotonic clock.
///
/// Zero-sized: every instance reads the same process-wide epoch, so cloning
/// or constructing more than one `RealClock` is free and harmless.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl RealClock {
    /// Creates a new handle to the host monotonic clock.
    pub fn new() -> Self {
        RealClock
    }
}

impl Clock for RealClock {
    fn now_nanos(&self) -> u64 {
        epoch().elapsed().as_nanos() as u64
    }

    fn sleep_nanos(&self, nanos: u64) {
        std::thread::sleep(Duration::from_nanos(nanos));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_nanos_is_monotonic() {
        let clock = RealClock::new();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn sleep_nanos_blocks_for_at_least_the_requested_duration() {
        let clock = RealClock::new();
        let start = clock.now_nanos();
        clock.sleep_nanos(1_000_000);
        let elapsed = clock.now_nanos() - start;
        assert!(elapsed >= 1_000_000);
    }
}
