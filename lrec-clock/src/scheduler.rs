//! Periodic task scheduler.
//!
//! Purpose: run a callback on a fixed period on a single dedicated thread,
//! the way `hkv-engine`'s TTL sweeper runs `purge_expired` on a timer. Built
//! against the `Clock` trait so the exact same scheduler drives interval
//! rotation in production (real time) and in tests (virtual time).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::SharedClock;

/// Handle for a scheduled periodic task.
///
/// Must be stopped to avoid leaking the background thread; there is no
/// `Drop` impl that stops it for you; the clock's `sleep_nanos` is generally
/// unbounded under a virtual clock, so a background thread here can only
/// safely be reclaimed by a caller that knows to advance the clock and join.
pub struct TaskHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Signals the task's thread to stop and waits for it to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Runs a callback on a fixed period against a shared `Clock`.
#[derive(Clone)]
pub struct Scheduler {
    clock: SharedClock,
}

impl Scheduler {
    /// Creates a scheduler driven by the given clock.
    pub fn new(clock: SharedClock) -> Self {
        Scheduler { clock }
    }

    /// Schedules `task` to run every `period_nanos`, starting after the
    /// first period elapses (there is no immediate first call).
    pub fn schedule<F>(&self, period_nanos: u64, mut task: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let clock = Arc::clone(&self.clock);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                clock.sleep_nanos(period_nanos);
                if stop_thread.load(Ordering::Acquire) {
                    break;
                }
                task();
            }
        });

        TaskHandle {
            stop,
            join: Some(join),
        }
    }
}
