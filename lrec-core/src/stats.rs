//! The public latency-statistics recorder.
//!
//! Ties together the [`phaser`](crate::phaser), the
//! [`TimeCappedEstimator`](crate::estimator::TimeCappedEstimator), and a
//! [`PauseDetector`](crate::pause::PauseDetector) subscription into the one
//! object client code actually calls. Each double-buffered histogram pair
//! is indexed by the phaser token's own parity rather than a separately
//! swapped pointer: a writer's token parity never changes after
//! `writer_enter`, so `histograms[token.slot()]` names a stable, correct
//! target for the whole critical section, and a flip only ever changes
//! which parity *future* writers will be assigned.

use std::sync::{Arc, Weak};

use lrec_clock::SharedClock;
use lrec_common::LatencyStatsError;

use crate::config::LatencyStatsConfig;
use crate::estimator::TimeCappedEstimator;
use crate::histo::AtomicHistogram;
use crate::pause::{self, ListenerId, PauseDetector, PauseListener};
use crate::phaser::Phaser;

/// Coordinated-omission-corrected latency recorder.
///
/// Records observed latencies wait-free from any thread, subscribes to a
/// [`PauseDetector`] to synthesize correction samples for stalls, and
/// serves interval histograms (raw and corrected) via a non-blocking
/// phase-flip rotation.
pub struct LatencyStats {
    raw: [AtomicHistogram; 2],
    corrections: [AtomicHistogram; 2],
    phaser: Phaser,
    estimator: Arc<TimeCappedEstimator>,
    clock: SharedClock,
    detector: Arc<dyn PauseDetector>,
    estimator_listener_id: ListenerId,
    self_listener_id: parking_lot::Mutex<Option<ListenerId>>,
}

impl LatencyStats {
    /// Builds a recorder against the real wall clock and the process-wide
    /// default pause detector.
    pub fn new(config: LatencyStatsConfig) -> Result<Arc<Self>, lrec_common::ConfigError> {
        Self::with_clock_and_detector(
            config,
            Arc::new(lrec_clock::RealClock::default()),
            pause::default_detector(),
        )
    }

    /// Builds a recorder against an explicit clock and detector, letting
    /// tests drive it with a [`lrec_clock::VirtualClock`] and a private
    /// [`crate::pause::SimplePauseDetector`].
    pub fn with_clock_and_detector(
        config: LatencyStatsConfig,
        clock: SharedClock,
        detector: Arc<dyn PauseDetector>,
    ) -> Result<Arc<Self>, lrec_common::ConfigError> {
        config.validate()?;

        let make_pair = || -> Result<[AtomicHistogram; 2], hdrhistogram::CreationError> {
            Ok([
                AtomicHistogram::new(
                    config.lowest_trackable_value,
                    config.highest_trackable_value,
                    config.significant_digits,
                )?,
                AtomicHistogram::new(
                    config.lowest_trackable_value,
                    config.highest_trackable_value,
                    config.significant_digits,
                )?,
            ])
        };
        let raw = make_pair().map_err(lrec_common::ConfigError::InvalidHistogramRange)?;
        let corrections = make_pair().map_err(lrec_common::ConfigError::InvalidHistogramRange)?;

        let estimator = Arc::new(TimeCappedEstimator::new(
            config.estimator_window,
            config.estimator_time_cap_nanos,
        ));

        let estimator_weak: Weak<dyn PauseListener> = Arc::downgrade(&estimator);
        let estimator_listener_id = detector.add_listener(estimator_weak, true);

        let stats = Arc::new(LatencyStats {
            raw,
            corrections,
            phaser: Phaser::new(),
            estimator,
            clock,
            detector,
            estimator_listener_id,
            self_listener_id: parking_lot::Mutex::new(None),
        });

        let stats_weak: Weak<dyn PauseListener> = Arc::downgrade(&stats);
        let self_listener_id = stats.detector.add_listener(stats_weak, false);
        *stats.self_listener_id.lock() = Some(self_listener_id);

        Ok(stats)
    }

    /// Records an observed latency, in nanoseconds, measured at the
    /// current time. Wait-free except for the brief mutex naturally held
    /// by the underlying `hdrhistogram::Histogram::record` call (see
    /// [`crate::histo`]).
    pub fn record_latency(&self, value_nanos: u64) -> Result<(), LatencyStatsError> {
        let guard = self.phaser.writer_enter();
        let now = self.clock.now_nanos();
        self.estimator.record(now);
        self.raw[guard.slot()].record(value_nanos)
    }

    /// Rotates the double-buffered histograms and returns a fresh
    /// uncorrected+corrected interval histogram combining both.
    pub fn get_interval_histogram(&self) -> Result<hdrhistogram::Histogram<u64>, LatencyStatsError> {
        let (slot, _reader) = self.rotate();
        let mut combined = self.raw[slot].snapshot();
        self.corrections[slot]
            .add_into(&mut combined)
            .expect("corrections histogram must share raw's bounds");
        Ok(combined)
    }

    /// Rotates and writes the combined interval histogram into `target`,
    /// replacing its contents.
    pub fn get_interval_histogram_into(
        &self,
        target: &mut hdrhistogram::Histogram<u64>,
    ) -> Result<(), LatencyStatsError> {
        target.reset();
        let (slot, _reader) = self.rotate();
        self.raw[slot].add_into(target).expect("bounds mismatch");
        self.corrections[slot]
            .add_into(target)
            .expect("bounds mismatch");
        Ok(())
    }

    /// Rotates and adds the combined interval histogram's contents into
    /// `target`, without resetting it first.
    pub fn add_interval_histogram_to(
        &self,
        target: &mut hdrhistogram::Histogram<u64>,
    ) -> Result<(), LatencyStatsError> {
        let (slot, _reader) = self.rotate();
        self.raw[slot].add_into(target).expect("bounds mismatch");
        self.corrections[slot]
            .add_into(target)
            .expect("bounds mismatch");
        Ok(())
    }

    /// Rotates and returns the raw and synthesized-correction interval
    /// histograms separately, for callers that want to report on the
    /// coordinated-omission correction's contribution on its own rather than
    /// folded into a single combined view.
    pub fn get_separate_interval_histograms(
        &self,
    ) -> (hdrhistogram::Histogram<u64>, hdrhistogram::Histogram<u64>) {
        let (slot, _reader) = self.rotate();
        (self.raw[slot].snapshot(), self.corrections[slot].snapshot())
    }

    /// Rotates the double buffers: resets the slot about to become active,
    /// stamps both slots' timestamps, and waits (via the phaser) for any
    /// writer still publishing into the slot being handed to the reader.
    /// Returns the now-inactive slot index together with the reader guard
    /// that made it safe to read: callers must keep the guard alive for as
    /// long as they read from that slot, since dropping it early would let a
    /// second, concurrent `rotate()` reset the same slot out from under
    /// them.
    fn rotate(&self) -> (usize, crate::phaser::ReaderGuard<'_>) {
        let mut reader = self.phaser.reader_lock();
        let active_slot = reader.active_slot();
        let next_slot = 1 - active_slot;
        let now_ms = self.clock.now_millis();

        self.raw[next_slot].reset();
        self.raw[next_slot].set_start_time(now_ms);
        self.corrections[next_slot].reset();
        self.corrections[next_slot].set_start_time(now_ms);

        self.raw[active_slot].set_end_time(now_ms);
        self.corrections[active_slot].set_end_time(now_ms);

        reader.flip_phase();
        tracing::trace!(rotated_from = active_slot, rotated_to = next_slot, "interval rotated");

        (active_slot, reader)
    }

    /// Deregisters this recorder and its estimator from the pause
    /// detector. Not required for correctness (both are held only by
    /// `Weak`), but avoids waiting for the detector's next sweep to notice
    /// they are gone.
    pub fn stop(&self) {
        if let Some(id) = self.self_listener_id.lock().take() {
            self.detector.remove_listener(id);
        }
        self.detector.remove_listener(self.estimator_listener_id);
    }
}

impl PauseListener for LatencyStats {
    /// Synthesizes a linear back-fill of synthetic latencies for the
    /// portion of a detected pause too large to be explained by normal
    /// request spacing.
    fn on_pause(&self, length_nanos: u64, end_time_nanos: u64) {
        let guard = self.phaser.writer_enter();

        let estimated_interval = self.estimator.estimate(end_time_nanos);
        if estimated_interval == crate::estimator::NOT_ENOUGH_SAMPLES {
            return;
        }

        let min_bar = length_nanos.saturating_sub(estimated_interval);
        if min_bar >= estimated_interval {
            tracing::debug!(length_nanos, estimated_interval, "synthesizing pause correction");
            let _ = self.corrections[guard.slot()].record_correct(min_bar, estimated_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pause::SimplePauseDetector;
    use lrec_clock::VirtualClock;
    use std::sync::Arc;

    fn test_stats(clock: VirtualClock) -> (Arc<LatencyStats>, Arc<SimplePauseDetector>) {
        let shared_clock: SharedClock = Arc::new(clock);
        let detector = Arc::new(
            SimplePauseDetector::with_clock(
                crate::pause::SimplePauseDetectorConfig {
                    sleep_interval_nanos: 0,
                    notification_threshold_nanos: 1_000_000,
                    threads: 1,
                },
                Arc::clone(&shared_clock),
            )
            .unwrap(),
        );
        let stats = LatencyStats::with_clock_and_detector(
            LatencyStatsConfig {
                estimator_window: 4,
                ..LatencyStatsConfig::default()
            },
            shared_clock,
            Arc::clone(&detector) as Arc<dyn PauseDetector>,
        )
        .unwrap();
        (stats, detector)
    }

    #[test]
    fn constant_rate_no_pauses_counts_match() {
        let clock = VirtualClock::new();
        let (stats, _detector) = test_stats(clock.clone());

        for i in 0..2000u64 {
            clock.move_time_forward(5_000_000);
            stats.record_latency(5_000_000 + i % 3).unwrap();
        }

        let histogram = stats.get_interval_histogram().unwrap();
        assert_eq!(histogram.len(), 2000);
    }

    #[test]
    fn interval_counts_are_disjoint_across_rotations() {
        let clock = VirtualClock::new();
        let (stats, _detector) = test_stats(clock.clone());

        for _ in 0..10 {
            clock.move_time_forward(1_000);
            stats.record_latency(1_000).unwrap();
        }
        let first = stats.get_interval_histogram().unwrap();
        assert_eq!(first.len(), 10);

        for _ in 0..5 {
            clock.move_time_forward(1_000);
            stats.record_latency(1_000).unwrap();
        }
        let second = stats.get_interval_histogram().unwrap();
        assert_eq!(second.len(), 5);
    }

    #[test]
    fn pause_correction_backfills_the_corrections_histogram() {
        let clock = VirtualClock::new();
        let (stats, _detector) = test_stats(clock.clone());

        // Warm up the estimator to a steady 5ms interval.
        for _ in 0..8 {
            clock.move_time_forward(5_000_000);
            stats.record_latency(1).unwrap();
        }

        let now = clock.now_nanos();
        stats.on_pause(5_000_000_000, now);

        let histogram = stats.get_interval_histogram().unwrap();
        assert!(histogram.len() > 8);
    }

    #[test]
    fn separate_histograms_isolate_the_correction_samples() {
        let clock = VirtualClock::new();
        let (stats, _detector) = test_stats(clock.clone());

        for _ in 0..8 {
            clock.move_time_forward(5_000_000);
            stats.record_latency(1).unwrap();
        }
        let now = clock.now_nanos();
        stats.on_pause(5_000_000_000, now);

        let (raw, corrections) = stats.get_separate_interval_histograms();
        assert_eq!(raw.len(), 8);
        assert!(corrections.len() > 0);
    }

    #[test]
    fn dropping_all_references_without_stop_is_safe() {
        let clock = VirtualClock::new();
        let (stats, detector) = test_stats(clock.clone());

        let weak_stats = Arc::downgrade(&stats);
        drop(stats);
        assert_eq!(weak_stats.strong_count(), 0);

        // The dispatcher's listener list still holds a dead Weak at this
        // point. Notifying must prune it rather than panic or leak forever.
        detector.notify(10_000_000, clock.now_nanos());
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
}
