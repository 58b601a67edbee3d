//! Ring-buffer moving-average interval estimator.
//!
//! ## Design Principles
//! 1. **Lock-Free Recording**: a single `fetch_add` claims a slot, then a
//!    plain atomic store publishes the timestamp into it. No writer ever
//!    blocks another, and no writer blocks `estimate`.
//! 2. **Torn-Read Tolerance**: `estimate` can observe a slot mid-write (the
//!    counter moved but the store has not landed yet, or vice versa). Rather
//!    than synchronizing writers against this, it resamples the counter
//!    after reading and retries until two consecutive counter reads agree,
//!    the same technique `hkv-engine`'s generation-counted slot reads use.

use std::sync::atomic::{AtomicU64, Ordering};

use super::NOT_ENOUGH_SAMPLES;

/// Tracks the last `window` recording timestamps in a power-of-two ring and
/// derives the average inter-arrival interval from their span.
pub struct MovingAverageEstimator {
    times: Box<[AtomicU64]>,
    mask: usize,
    window: u64,
    count: AtomicU64,
}

impl MovingAverageEstimator {
    /// Creates an estimator over the given window. `window` is clamped up to
    /// at least 2 and rounded up to the next power of two; a window of 0 or
    /// 1 would make the `window - 1` divisor in `estimate` degenerate, so
    /// callers never see that failure mode — the window is just silently
    /// widened, matching how out-of-range config values are handled
    /// elsewhere in this crate.
    pub fn new(window: usize) -> Self {
        let window = window.max(2).next_power_of_two();
        let times = (0..window).map(|_| AtomicU64::new(0)).collect();
        MovingAverageEstimator {
            times,
            mask: window - 1,
            window: window as u64,
            count: AtomicU64::new(0),
        }
    }

    /// Window size actually in effect after clamping/rounding.
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Records a new sample timestamp, in nanoseconds.
    #[inline]
    pub fn record(&self, end_time: u64) {
        let prev = self.count.fetch_add(1, Ordering::AcqRel);
        let slot = (prev as usize) & self.mask;
        self.times[slot].store(end_time, Ordering::Release);
    }

    /// Estimates the average interval between recordings as observed at
    /// `query_time`. Returns [`NOT_ENOUGH_SAMPLES`] until the window has
    /// filled at least once.
    pub fn estimate(&self, query_time: u64) -> u64 {
        loop {
            let count_before = self.count.load(Ordering::Acquire);
            if count_before < self.window {
                return NOT_ENOUGH_SAMPLES;
            }

            let newest_slot = ((count_before - 1) as usize) & self.mask;
            let oldest_slot = (count_before as usize) & self.mask;

            let newest = self.times[newest_slot].load(Ordering::Acquire);
            let oldest = self.times[oldest_slot].load(Ordering::Acquire);
            let end = newest.max(query_time);

            let count_after = self.count.load(Ordering::Acquire);
            if count_after != count_before {
                // A writer overlapped our read; the samples we saw may
                // straddle two different windows. Retry.
                continue;
            }
            if end < oldest {
                // Same torn-read symptom from the other direction.
                continue;
            }

            return ((end - oldest) / (self.window - 1)).max(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reports_not_enough_samples_before_window_fills() {
        let est = MovingAverageEstimator::new(4);
        assert_eq!(est.estimate(0), NOT_ENOUGH_SAMPLES);
        est.record(10);
        est.record(20);
        est.record(30);
        assert_eq!(est.estimate(30), NOT_ENOUGH_SAMPLES);
    }

    #[test]
    fn rounds_window_up_to_a_power_of_two() {
        let est = MovingAverageEstimator::new(5);
        assert_eq!(est.window(), 8);
        let est = MovingAverageEstimator::new(0);
        assert_eq!(est.window(), 2);
    }

    #[test]
    fn estimates_constant_rate_interval() {
        let est = MovingAverageEstimator::new(4);
        for i in 0..4u64 {
            est.record(i * 100);
        }
        // span = 300 over window-1 = 3 steps -> 100
        assert_eq!(est.estimate(300), 100);
    }

    #[test]
    fn query_time_extends_the_span_when_it_is_the_newest_point() {
        let est = MovingAverageEstimator::new(4);
        for i in 0..4u64 {
            est.record(i * 100);
        }
        // query far past the last sample should stretch the interval out
        assert!(est.estimate(10_000) > 100);
    }

    #[test]
    fn concurrent_recorders_never_panic_and_estimate_stays_sane() {
        let est = Arc::new(MovingAverageEstimator::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let est = Arc::clone(&est);
                thread::spawn(move || {
                    for i in 0..5_000u64 {
                        est.record(t * 1_000_000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let estimate = est.estimate(8_000_000);
        assert_ne!(estimate, NOT_ENOUGH_SAMPLES);
        assert!(estimate >= 1);
    }
}
