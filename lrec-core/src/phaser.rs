//! # Phased Writer-Reader Lock
//!
//! Purpose: let an unbounded number of writer threads record values without
//! ever blocking on each other or on a reader, while a single reader can
//! still ask "has every writer that started before this point finished?"
//! and get a correct, non-spurious answer.
//!
//! ## Design Principles
//! 1. **Wait-Free Writers**: `writer_enter`/`writer_exit` are a single
//!    `fetch_add` each. No CAS, no lock, no retry loop on the writer side.
//! 2. **RAII Exit**: writers get a guard, not a token to remember to release;
//!    the guard's `Drop` runs the exit even if the critical section panics
//!    or returns early, so a phase flip can never hang because of an
//!    in-progress error path (see the crate's error-handling notes).
//! 3. **Compile-Time Reader Discipline**: `flip_phase` is a method on
//!    `ReaderGuard`, which only `Phaser::reader_lock` can hand out. Calling
//!    it without holding the reader lock is not a runtime condition to
//!    check for — the borrow checker makes it impossible to express.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Three monotonically increasing epoch counters implementing the phase-flip
/// protocol described in the design. `start_epoch`'s low bit selects which of
/// `even_end_epoch`/`odd_end_epoch` a given writer must increment on exit.
pub struct Phaser {
    start_epoch: AtomicU64,
    even_end_epoch: AtomicU64,
    odd_end_epoch: AtomicU64,
    reader_mutex: Mutex<()>,
}

impl Default for Phaser {
    fn default() -> Self {
        Self::new()
    }
}

impl Phaser {
    /// Creates a phaser with the even phase active from the start.
    pub fn new() -> Self {
        Phaser {
            start_epoch: AtomicU64::new(0),
            even_end_epoch: AtomicU64::new(0),
            odd_end_epoch: AtomicU64::new(1),
            reader_mutex: Mutex::new(()),
        }
    }

    /// Enters a writer critical section. The returned guard must be kept
    /// alive for the duration of the section; dropping it (including via
    /// unwind) is what signals completion to a concurrent `flip_phase`.
    #[inline]
    pub fn writer_enter(&self) -> WriterGuard<'_> {
        let token = self.start_epoch.fetch_add(2, Ordering::AcqRel);
        WriterGuard {
            phaser: self,
            token,
        }
    }

    #[inline]
    fn writer_exit(&self, token: u64) {
        if token % 2 == 0 {
            self.even_end_epoch.fetch_add(2, Ordering::Release);
        } else {
            self.odd_end_epoch.fetch_add(2, Ordering::Release);
        }
    }

    /// Acquires the exclusive reader section. Only one `ReaderGuard` can
    /// exist at a time; a second concurrent caller blocks until the first
    /// guard is dropped.
    pub fn reader_lock(&self) -> ReaderGuard<'_> {
        ReaderGuard {
            phaser: self,
            _guard: self.reader_mutex.lock(),
        }
    }
}

/// RAII writer token. Exiting the critical section is just dropping this.
pub struct WriterGuard<'a> {
    phaser: &'a Phaser,
    token: u64,
}

impl WriterGuard<'_> {
    /// Which of the two double-buffered slots this writer's token belongs
    /// to (0 or 1). Stable for the guard's whole lifetime even if a reader
    /// flips the phase concurrently, since the slot is derived from the
    /// token captured at `writer_enter`, not from the phaser's live state.
    #[inline]
    pub fn slot(&self) -> usize {
        (self.token % 2) as usize
    }
}

impl Drop for WriterGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.phaser.writer_exit(self.token);
    }
}

/// Proof of holding the reader lock. `flip_phase` is only reachable through
/// this guard.
pub struct ReaderGuard<'a> {
    phaser: &'a Phaser,
    _guard: MutexGuard<'a, ()>,
}

impl ReaderGuard<'_> {
    /// The slot (0 or 1) writers are currently publishing into. Stable
    /// until this guard calls `flip_phase`, since only a flip changes the
    /// active parity and only one `ReaderGuard` can exist at a time.
    #[inline]
    pub fn active_slot(&self) -> usize {
        (self.phaser.start_epoch.load(Ordering::Acquire) % 2) as usize
    }

    /// Performs the phase flip: the currently-active parity becomes
    /// inactive, and this call does not return until every writer that
    /// entered under the old parity has exited. Bounded in practice by the
    /// longest writer critical section, since no new writer can join the
    /// old parity once the flip has swapped `start_epoch`.
    pub fn flip_phase(&mut self) {
        let start_was_odd = self.phaser.start_epoch.load(Ordering::Acquire) & 1 == 1;
        let next_base: u64 = if start_was_odd { 0 } else { 1 };

        // Reset the *next* phase's end epoch before publishing the new
        // base, so no writer entering under the new parity can race a
        // reset that would erase its exit.
        if next_base == 0 {
            self.phaser.even_end_epoch.store(0, Ordering::Release);
        } else {
            self.phaser.odd_end_epoch.store(1, Ordering::Release);
        }

        let start_at_flip = self.phaser.start_epoch.swap(next_base, Ordering::AcqRel);
        tracing::trace!(next_base, "phase flip started");

        loop {
            let previous_end = if start_was_odd {
                self.phaser.odd_end_epoch.load(Ordering::Acquire)
            } else {
                self.phaser.even_end_epoch.load(Ordering::Acquire)
            };
            if previous_end == start_at_flip {
                return;
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn active_slot_toggles_across_flips() {
        let phaser = Phaser::new();
        assert_eq!(phaser.reader_lock().active_slot(), 0);
        phaser.reader_lock().flip_phase();
        assert_eq!(phaser.reader_lock().active_slot(), 1);
        phaser.reader_lock().flip_phase();
        assert_eq!(phaser.reader_lock().active_slot(), 0);
    }

    #[test]
    fn writer_guard_slot_matches_active_slot_at_entry() {
        let phaser = Phaser::new();
        {
            let guard = phaser.writer_enter();
            assert_eq!(guard.slot(), 0);
        }
        phaser.reader_lock().flip_phase();
        {
            let guard = phaser.writer_enter();
            assert_eq!(guard.slot(), 1);
        }
    }

    #[test]
    fn single_writer_round_trip() {
        let phaser = Phaser::new();
        {
            let _guard = phaser.writer_enter();
        }
        let mut reader = phaser.reader_lock();
        reader.flip_phase();
    }

    #[test]
    fn writer_guard_exits_even_on_early_return() {
        let phaser = Phaser::new();

        fn section(phaser: &Phaser, fail: bool) -> Result<(), &'static str> {
            let _guard = phaser.writer_enter();
            if fail {
                return Err("boom");
            }
            Ok(())
        }

        let _ = section(&phaser, true);
        // If the guard's exit did not run, this would spin forever.
        phaser.reader_lock().flip_phase();
    }

    #[test]
    fn concurrent_writers_all_accounted_for_at_flip() {
        let phaser = Arc::new(Phaser::new());
        let total_entered = Arc::new(AtomicUsize::new(0));
        const THREADS: usize = 8;
        const PER_THREAD: usize = 20_000;

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let phaser = Arc::clone(&phaser);
                let total_entered = Arc::clone(&total_entered);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        let _guard = phaser.writer_enter();
                        total_entered.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // All writers finished before we ever flip, so this must return
        // immediately rather than spin.
        phaser.reader_lock().flip_phase();
        assert_eq!(total_entered.load(Ordering::Relaxed), THREADS * PER_THREAD);
    }

    #[test]
    fn flip_waits_for_in_flight_writer_of_the_matching_parity() {
        use std::sync::Barrier;
        use std::time::Duration;

        let phaser = Arc::new(Phaser::new());
        let barrier = Arc::new(Barrier::new(2));

        let writer_phaser = Arc::clone(&phaser);
        let writer_barrier = Arc::clone(&barrier);
        let writer = thread::spawn(move || {
            let _guard = writer_phaser.writer_enter();
            writer_barrier.wait();
            thread::sleep(Duration::from_millis(30));
            // guard drops here, releasing the writer
        });

        barrier.wait();
        // The writer is now guaranteed to be inside its critical section.
        let start = std::time::Instant::now();
        phaser.reader_lock().flip_phase();
        assert!(start.elapsed() >= Duration::from_millis(20));

        writer.join().unwrap();
    }
}
