//! Process-wide pause (stall) detection and notification.
//!
//! A pause detector discovers stalls and fans them out to subscribers
//! without holding a strong reference to them: [`PauseDetector::add_listener`]
//! takes a `Weak`, so a `LatencyStats` that is dropped without calling
//! `stop()` is still reclaimed the next time a notification sweeps past its
//! now-dead weak pointer, rather than being kept alive forever by the
//! detector's registry.

mod dispatcher;
pub mod simple;

pub use simple::{SimplePauseDetector, SimplePauseDetectorConfig};

use std::sync::{Arc, OnceLock, Weak};

/// Something that wants to hear about detected pauses.
pub trait PauseListener: Send + Sync {
    /// Called with the pause's length and the timestamp it ended at, both
    /// in nanoseconds, once per detected hiccup.
    fn on_pause(&self, length_nanos: u64, end_time_nanos: u64);
}

/// Opaque handle returned by [`PauseDetector::add_listener`], used to
/// deregister a specific registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(pub(crate) u64);

/// A source of pause notifications that other components can subscribe to.
pub trait PauseDetector: Send + Sync {
    /// Registers a listener. High-priority listeners are notified before
    /// normal-priority ones for the same event.
    fn add_listener(&self, listener: Weak<dyn PauseListener>, high_priority: bool) -> ListenerId;

    /// Deregisters a previously added listener. A no-op if already removed.
    fn remove_listener(&self, id: ListenerId);

    /// Publishes a pause event to all current listeners, high priority
    /// first, in registration order within each priority.
    fn notify(&self, length_nanos: u64, end_time_nanos: u64);
}

static DEFAULT_DETECTOR: OnceLock<Arc<dyn PauseDetector>> = OnceLock::new();

/// Returns the process-wide default pause detector, lazily constructing a
/// [`SimplePauseDetector`] with its default configuration on first use.
pub fn default_detector() -> Arc<dyn PauseDetector> {
    DEFAULT_DETECTOR
        .get_or_init(|| Arc::new(SimplePauseDetector::new(SimplePauseDetectorConfig::default())))
        .clone()
}

/// Installs `detector` as the process-wide default, if one has not already
/// been installed or lazily created. Returns the rejected detector back to
/// the caller if a default was already in place.
pub fn set_default_detector(
    detector: Arc<dyn PauseDetector>,
) -> Result<(), Arc<dyn PauseDetector>> {
    DEFAULT_DETECTOR.set(detector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct Counter(AtomicU64);

    impl PauseListener for Counter {
        fn on_pause(&self, length_nanos: u64, _end_time_nanos: u64) {
            self.0.fetch_add(length_nanos, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_detector_is_a_singleton() {
        let a = default_detector();
        let b = default_detector();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
