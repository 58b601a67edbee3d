//! Pause-aware interval estimator.
//!
//! Wraps the same lock-free timestamp ring as [`super::moving_average`], but
//! widens its effective window by the length of any pause that overlaps it,
//! so a stall does not masquerade as a sudden drop in traffic. Pause
//! bookkeeping runs under a `parking_lot::Mutex` since pauses are rare
//! events (at most one detector tick's worth per thread), unlike the
//! recording hot path, which stays lock-free.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::NOT_ENOUGH_SAMPLES as IMPOSSIBLY_LARGE;
use crate::pause::PauseListener;

/// Ring capacity for in-flight pauses. Spec-sized at 32: far more concurrent
/// overlapping pauses than any real stall pattern produces.
const PAUSE_RING_CAPACITY: usize = 32;

struct PauseState {
    time_cap: u64,
    ring: VecDeque<(u64, u64)>,
}

/// Moving-average interval estimator whose effective time cap grows to
/// cover reported pauses, and shrinks back as they age out of the window.
pub struct TimeCappedEstimator {
    times: Box<[AtomicU64]>,
    mask: usize,
    window: u64,
    count: AtomicU64,
    base_time_cap: u64,
    pauses: Mutex<PauseState>,
}

impl TimeCappedEstimator {
    /// Creates an estimator with the given window (rounded up as in
    /// [`super::MovingAverageEstimator`]) and base time cap in nanoseconds.
    pub fn new(window: usize, base_time_cap: u64) -> Self {
        let window = window.max(2).next_power_of_two();
        let times = (0..window).map(|_| AtomicU64::new(0)).collect();
        TimeCappedEstimator {
            times,
            mask: window - 1,
            window: window as u64,
            count: AtomicU64::new(0),
            base_time_cap,
            pauses: Mutex::new(PauseState {
                time_cap: base_time_cap,
                ring: VecDeque::with_capacity(PAUSE_RING_CAPACITY),
            }),
        }
    }

    /// Records a new sample timestamp, in nanoseconds.
    #[inline]
    pub fn record(&self, end_time: u64) {
        let prev = self.count.fetch_add(1, Ordering::AcqRel);
        let slot = (prev as usize) & self.mask;
        self.times[slot].store(end_time, Ordering::Release);
    }

    /// Registers a pause of `length` ending at `end_time`, inflating the
    /// effective time cap until the pause ages out of the query window.
    pub fn record_pause(&self, length: u64, end_time: u64) {
        let start_time = end_time.saturating_sub(length);
        let mut state = self.pauses.lock();
        if state.ring.len() == PAUSE_RING_CAPACITY {
            if let Some((_, evicted_length)) = state.ring.pop_front() {
                state.time_cap = state.time_cap.saturating_sub(evicted_length);
            }
        }
        state.ring.push_back((start_time, length));
        state.time_cap += length;
    }

    /// Expires pauses that have aged out of `[query_time - timeCap,
    /// query_time]` and returns the resulting (possibly still inflated)
    /// time cap. Loops to a fixpoint: each eviction shrinks `timeCap`, which
    /// can bring the *next* oldest pause back inside the window boundary.
    fn refresh_time_cap(&self, query_time: u64) -> u64 {
        let mut state = self.pauses.lock();
        loop {
            let cutoff = query_time.saturating_sub(state.time_cap);
            match state.ring.front().copied() {
                Some((start, length)) if start < cutoff => {
                    state.ring.pop_front();
                    state.time_cap = state.time_cap.saturating_sub(length);
                }
                _ => break,
            }
        }
        state.time_cap
    }

    /// Estimates the expected interval as observed at `query_time`,
    /// accounting for any pauses still inside the window.
    pub fn estimate(&self, query_time: u64) -> u64 {
        loop {
            let count_before = self.count.load(Ordering::Acquire);
            if count_before < self.window {
                return IMPOSSIBLY_LARGE;
            }

            let time_cap = self.refresh_time_cap(query_time);
            let cutoff = query_time.saturating_sub(time_cap);
            let cursor = (count_before as usize) & self.mask;

            // Binary search for the smallest logical age `outside` such
            // that the sample at that age is still >= cutoff. Samples are
            // monotonically non-decreasing by logical age from `cursor`.
            let mut lo: u64 = 0;
            let mut hi: u64 = self.window;
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                let idx = (cursor + mid as usize) & self.mask;
                let t = self.times[idx].load(Ordering::Acquire);
                if t < cutoff {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            let outside = lo;
            let usable = self.window - outside;

            let count_after = self.count.load(Ordering::Acquire);
            if count_after != count_before {
                continue;
            }

            if usable <= 1 {
                return IMPOSSIBLY_LARGE;
            }

            let window_start_idx = (cursor + outside as usize) & self.mask;
            let window_start = self.times[window_start_idx].load(Ordering::Acquire);
            let newest_idx = ((count_before - 1) as usize) & self.mask;
            let newest = self.times[newest_idx].load(Ordering::Acquire);

            // The cap computation above already decided this window is still
            // retained despite however much time has passed since `newest` —
            // that's precisely what a registered pause covering the gap
            // means. So the span to divide is the real span between the
            // oldest retained sample and the newest one, not `query_time`:
            // using `query_time` here would fold the pause's own length
            // back into the numerator a second time and collapse the result
            // to the sentinel instead of recovering the pre-pause estimate.
            let window_span = newest.saturating_sub(window_start);

            return (window_span / (usable - 1)).max(1);
        }
    }
}

impl PauseListener for TimeCappedEstimator {
    /// Registered at high priority so the estimator's time cap reflects a
    /// pause before recorders see the same event and synthesize
    /// correction samples off of it.
    fn on_pause(&self, length_nanos: u64, end_time_nanos: u64) {
        self.record_pause(length_nanos, end_time_nanos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_before_window_fills_is_impossibly_large() {
        let est = TimeCappedEstimator::new(4, 1_000_000_000);
        assert_eq!(est.estimate(0), IMPOSSIBLY_LARGE);
    }

    #[test]
    fn time_cap_eviction_matches_the_documented_scenario() {
        let est = TimeCappedEstimator::new(32, 1_000_000_000);
        for i in 0..32u64 {
            est.record(i * 20);
        }
        let last = 31 * 20;
        assert_eq!(est.estimate(last), 20);

        // Advance past the base time cap with no new samples.
        assert_eq!(est.estimate(2_000_000_000), IMPOSSIBLY_LARGE);

        // A 1.5s pause ending at 1.5s keeps the window alive at t=2s.
        est.record_pause(1_500_000_000, 1_500_000_000);
        assert_eq!(est.estimate(2_000_000_000), 20);

        // But the inflated cap eventually ages out too.
        assert_eq!(est.estimate(3_000_000_000), IMPOSSIBLY_LARGE);
    }

    #[test]
    fn pause_ring_evicts_oldest_entry_when_full() {
        let est = TimeCappedEstimator::new(2, 0);
        for i in 0..(PAUSE_RING_CAPACITY + 1) {
            est.record_pause(10, (i as u64) * 100);
        }
        // The ring held at most PAUSE_RING_CAPACITY entries; the oldest
        // was evicted, so its length must not be double-counted.
        let time_cap = est.refresh_time_cap(u64::MAX / 2);
        assert!(time_cap <= (PAUSE_RING_CAPACITY as u64) * 10);
    }
}
