//! Thin, shareable wrapper around `hdrhistogram::Histogram<u64>`.
//!
//! `Histogram::record` takes `&mut self`. The crate's own answer to
//! multi-writer concurrency is `sync::Recorder`/`SyncHistogram` — each
//! thread owns a private histogram, merged into the reader's copy on
//! `refresh()` — which assumes a writer registers once and keeps recording
//! from the same thread. `recordLatency` has no such affinity: any thread
//! can call it at any time. So each role's histogram here is wrapped in a
//! short `parking_lot::Mutex` instead. The crate's wait-free guarantee comes
//! from [`crate::phaser`] — a writer never blocks behind a concurrent
//! reader's rotation — not from this wrapper, which only supplies the
//! exclusion `&mut self` requires when two writer threads land on the same
//! active histogram at once.

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use lrec_common::LatencyStatsError;

/// A `Histogram<u64>` safe to record into from any thread holding only a
/// shared reference.
pub struct AtomicHistogram {
    inner: Mutex<Histogram<u64>>,
}

impl AtomicHistogram {
    /// Constructs a histogram over `[lowest_trackable, highest_trackable]`
    /// with the given precision.
    pub fn new(
        lowest_trackable: u64,
        highest_trackable: u64,
        significant_digits: u8,
    ) -> Result<Self, hdrhistogram::CreationError> {
        let histogram =
            Histogram::new_with_bounds(lowest_trackable, highest_trackable, significant_digits)?;
        Ok(AtomicHistogram {
            inner: Mutex::new(histogram),
        })
    }

    /// Records a single value.
    #[inline]
    pub fn record(&self, value: u64) -> Result<(), LatencyStatsError> {
        self.inner.lock().record(value).map_err(Into::into)
    }

    /// Records a single correction sample (see `hdrhistogram`'s
    /// `record_correct`), linearly back-filling the range down to
    /// `interval`.
    #[inline]
    pub fn record_correct(&self, value: u64, interval: u64) -> Result<(), LatencyStatsError> {
        self.inner
            .lock()
            .record_correct(value, interval)
            .map_err(Into::into)
    }

    /// Clears all recorded values in place.
    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    /// Stamps the histogram's interval start time, in milliseconds.
    pub fn set_start_time(&self, ms: u64) {
        self.inner.lock().set_start_time_stamp(ms);
    }

    /// Stamps the histogram's interval end time, in milliseconds.
    pub fn set_end_time(&self, ms: u64) {
        self.inner.lock().set_end_time_stamp(ms);
    }

    /// Returns an independent copy of the current contents.
    pub fn snapshot(&self) -> Histogram<u64> {
        self.inner.lock().clone()
    }

    /// Adds this histogram's contents into `target`.
    pub fn add_into(&self, target: &mut Histogram<u64>) -> Result<(), hdrhistogram::AdditionError> {
        target.add(&*self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reports_a_value() {
        let histo = AtomicHistogram::new(1, 1_000_000, 2).unwrap();
        histo.record(100).unwrap();
        let snapshot = histo.snapshot();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn reset_clears_recorded_values() {
        let histo = AtomicHistogram::new(1, 1_000_000, 2).unwrap();
        histo.record(100).unwrap();
        histo.reset();
        assert_eq!(histo.snapshot().len(), 0);
    }

    #[test]
    fn add_into_merges_contents() {
        let histo = AtomicHistogram::new(1, 1_000_000, 2).unwrap();
        histo.record(50).unwrap();
        let mut target = Histogram::new_with_bounds(1, 1_000_000, 2).unwrap();
        histo.add_into(&mut target).unwrap();
        assert_eq!(target.len(), 1);
    }
}
