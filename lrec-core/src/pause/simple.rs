//! Consensus-based stall detector.
//!
//! N observer threads race to publish the current time into a shared
//! counter. Only the thread that wins the compare-and-swap on a given tick
//! measures and (if large enough) reports the gap — which means a stall
//! visible to only one thread (a blocked I/O call, say) never triggers a
//! report, since a lone thread's CAS always succeeds trivially and its
//! "gap" is just its own sleep interval. A gap only grows large when every
//! other thread was also unable to advance the counter, i.e. the whole
//! process stalled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use lrec_clock::SharedClock;
use lrec_common::ConfigError;
use parking_lot::Mutex;

use super::dispatcher::{Command, Dispatcher};
use super::{ListenerId, PauseDetector, PauseListener};

/// Tuning knobs for [`SimplePauseDetector`].
#[derive(Debug, Clone, Copy)]
pub struct SimplePauseDetectorConfig {
    /// How long each observer sleeps between consensus attempts.
    pub sleep_interval_nanos: u64,
    /// Gaps at or below this are assumed to be ordinary scheduling jitter.
    pub notification_threshold_nanos: u64,
    /// Number of observer threads. Capped at 64 (one bit per thread in the
    /// test-only stall/stop bitmasks).
    pub threads: usize,
}

impl Default for SimplePauseDetectorConfig {
    fn default() -> Self {
        SimplePauseDetectorConfig {
            sleep_interval_nanos: 1_000_000,
            notification_threshold_nanos: 1_000_000,
            threads: 3,
        }
    }
}

impl SimplePauseDetectorConfig {
    /// Rejects thread counts outside `1..=64` before any thread is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 || self.threads > 64 {
            return Err(ConfigError::InvalidThreadCount(self.threads));
        }
        Ok(())
    }
}

/// A concrete, consensus-based [`PauseDetector`].
pub struct SimplePauseDetector {
    dispatcher: Dispatcher,
    consensus_latest_time: Arc<AtomicU64>,
    stall_mask: Arc<AtomicU64>,
    stop_mask: Arc<AtomicU64>,
    observers: Mutex<Vec<JoinHandle<()>>>,
}

impl SimplePauseDetector {
    /// Builds the detector and spawns `config.threads` observer threads
    /// driven by the real wall clock.
    ///
    /// Panics if `config` is invalid; use [`SimplePauseDetectorConfig::validate`]
    /// first if the thread count comes from untrusted input.
    pub fn new(config: SimplePauseDetectorConfig) -> Self {
        Self::with_clock(config, Arc::new(lrec_clock::RealClock::default()))
            .expect("invalid SimplePauseDetectorConfig")
    }

    /// Builds the detector against an arbitrary clock, so tests can drive
    /// the consensus loop with a [`lrec_clock::VirtualClock`].
    pub fn with_clock(
        config: SimplePauseDetectorConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let dispatcher = Dispatcher::new();
        let consensus_latest_time = Arc::new(AtomicU64::new(clock.now_nanos()));
        let stall_mask = Arc::new(AtomicU64::new(0));
        let stop_mask = Arc::new(AtomicU64::new(0));

        let mut observers = Vec::with_capacity(config.threads);
        for index in 0..config.threads {
            let clock = Arc::clone(&clock);
            let consensus_latest_time = Arc::clone(&consensus_latest_time);
            let stall_mask = Arc::clone(&stall_mask);
            let stop_mask = Arc::clone(&stop_mask);
            let sender = dispatcher.sender();
            let sleep_interval_nanos = config.sleep_interval_nanos;
            let notification_threshold_nanos = config.notification_threshold_nanos;

            let handle = std::thread::Builder::new()
                .name(format!("lrec-pause-observer-{index}"))
                .spawn(move || {
                    observe(
                        index,
                        clock,
                        consensus_latest_time,
                        stall_mask,
                        stop_mask,
                        sleep_interval_nanos,
                        notification_threshold_nanos,
                        sender,
                    )
                })
                .expect("failed to spawn pause observer thread");
            observers.push(handle);
        }

        Ok(SimplePauseDetector {
            dispatcher,
            consensus_latest_time,
            stall_mask,
            stop_mask,
            observers: Mutex::new(observers),
        })
    }

    /// Forces observer `index` into its busy-loop stall branch, for
    /// deterministic tests of the consensus algorithm. Not part of normal
    /// operation.
    pub fn stall_thread(&self, index: usize) {
        self.stall_mask.fetch_or(1 << index, Ordering::Release);
    }

    /// Releases a thread previously stalled with [`Self::stall_thread`].
    pub fn release_thread(&self, index: usize) {
        self.stall_mask.fetch_and(!(1 << index), Ordering::Release);
    }

    /// Signals every observer thread to stop and joins them, then shuts
    /// down the listener dispatcher. Consumes the detector: there is no
    /// valid state to return to after shutdown.
    pub fn stop(self) {
        self.shutdown_inner();
    }

    /// Idempotent shutdown shared by [`Self::stop`] and [`Drop`]: joining an
    /// already-drained observer list or shutting down an already-shut-down
    /// dispatcher is a safe no-op, so both paths can call this freely.
    fn shutdown_inner(&self) {
        self.stop_mask.store(u64::MAX, Ordering::Release);
        let mut observers = self.observers.lock();
        for handle in observers.drain(..) {
            let _ = handle.join();
        }
        self.dispatcher.shutdown();
    }
}

impl Drop for SimplePauseDetector {
    /// Joins every observer thread even if the caller dropped the detector
    /// without calling `stop()` — e.g. the process-wide default detector, or
    /// any holder that only ever reached it through a `Weak`. Without this,
    /// the observer threads spawned in `with_clock` would spin forever.
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl PauseDetector for SimplePauseDetector {
    fn add_listener(&self, listener: Weak<dyn PauseListener>, high_priority: bool) -> ListenerId {
        ListenerId(self.dispatcher.add_listener(listener, high_priority))
    }

    fn remove_listener(&self, id: ListenerId) {
        self.dispatcher.remove_listener(id.0);
    }

    fn notify(&self, length_nanos: u64, end_time_nanos: u64) {
        self.dispatcher.notify(length_nanos, end_time_nanos);
    }
}

#[allow(clippy::too_many_arguments)]
fn observe(
    index: usize,
    clock: SharedClock,
    consensus_latest_time: Arc<AtomicU64>,
    stall_mask: Arc<AtomicU64>,
    stop_mask: Arc<AtomicU64>,
    sleep_interval_nanos: u64,
    notification_threshold_nanos: u64,
    sender: crossbeam_channel::Sender<Command>,
) {
    let bit = 1u64 << index;
    let mut shortest_around = u64::MAX;
    let mut prev_now = clock.now_nanos();

    loop {
        if stop_mask.load(Ordering::Acquire) & bit != 0 {
            return;
        }

        if sleep_interval_nanos > 0 {
            clock.sleep_nanos(sleep_interval_nanos);
        }

        while stall_mask.load(Ordering::Acquire) & bit != 0 {
            if stop_mask.load(Ordering::Acquire) & bit != 0 {
                return;
            }
            std::hint::spin_loop();
        }

        if stop_mask.load(Ordering::Acquire) & bit != 0 {
            return;
        }

        let now = clock.now_nanos();
        let around = now.saturating_sub(prev_now);
        if around < shortest_around {
            shortest_around = around;
        }

        let prior = consensus_latest_time.load(Ordering::Acquire);
        if consensus_latest_time
            .compare_exchange(prior, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let delta = now.saturating_sub(prior);
            let hiccup = delta.saturating_sub(shortest_around);
            if hiccup > notification_threshold_nanos {
                tracing::debug!(observer = index, hiccup, "pause detected");
                let _ = sender.send(Command::Notify {
                    length_nanos: hiccup,
                    end_time_nanos: now,
                });
            }
        }

        prev_now = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrec_clock::VirtualClock;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::time::Duration;

    struct Recorder {
        length_nanos: AtomicU64,
    }

    impl PauseListener for Recorder {
        fn on_pause(&self, length_nanos: u64, _end_time_nanos: u64) {
            self.length_nanos.store(length_nanos, Ordering::SeqCst);
        }
    }

    #[test]
    fn stalling_a_single_thread_does_not_trigger_consensus() {
        let clock = VirtualClock::new();
        let config = SimplePauseDetectorConfig {
            sleep_interval_nanos: 1_000,
            notification_threshold_nanos: 100,
            threads: 3,
        };
        let detector = SimplePauseDetector::with_clock(config, Arc::new(clock.clone())).unwrap();

        let recorder = Arc::new(Recorder {
            length_nanos: AtomicU64::new(0),
        });
        let weak: Weak<dyn PauseListener> = Arc::downgrade(&recorder) as Weak<dyn PauseListener>;
        detector.add_listener(weak, false);

        detector.stall_thread(0);
        for _ in 0..20 {
            clock.move_time_forward(1_000);
            std::thread::sleep(Duration::from_millis(1));
        }
        // The other two threads still make consensus progress every tick,
        // so no large gap should ever have been observed.
        assert_eq!(recorder.length_nanos.load(Ordering::SeqCst), 0);

        detector.release_thread(0);
        detector.stop();
    }

    #[test]
    fn stalling_every_thread_eventually_triggers_a_notification() {
        let clock = VirtualClock::new();
        let config = SimplePauseDetectorConfig {
            sleep_interval_nanos: 1_000,
            notification_threshold_nanos: 500,
            threads: 2,
        };
        let detector = SimplePauseDetector::with_clock(config, Arc::new(clock.clone())).unwrap();

        let recorder = Arc::new(Recorder {
            length_nanos: AtomicU64::new(0),
        });
        let weak: Weak<dyn PauseListener> = Arc::downgrade(&recorder) as Weak<dyn PauseListener>;
        detector.add_listener(weak, false);

        // Warm up both observers' shortest-around baselines under a steady
        // tick before introducing a stall, so the eventual gap reads
        // against a small baseline rather than an arbitrary first sample.
        for _ in 0..20 {
            clock.move_time_forward(1_000);
            std::thread::sleep(Duration::from_millis(1));
        }

        detector.stall_thread(0);
        detector.stall_thread(1);
        std::thread::sleep(Duration::from_millis(5));
        clock.move_time_forward(10_000_000);
        detector.release_thread(0);
        detector.release_thread(1);

        let mut observed = 0;
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(2));
            clock.move_time_forward(1_000);
            observed = recorder.length_nanos.load(Ordering::SeqCst);
            if observed > 0 {
                break;
            }
        }
        assert!(observed > 0);

        detector.stop();
    }
}
