//! Interval estimation: how long should the recorder expect between two
//! consecutive recordings, measured at the instant a query is made.
//!
//! [`moving_average`] tracks a fixed-size ring of recent timestamps and
//! derives the expected interval from its span. [`time_capped`] wraps it and
//! adds a hard ceiling so a long quiet period does not let the window's
//! average drift arbitrarily high.

pub mod moving_average;
pub mod time_capped;

pub use moving_average::MovingAverageEstimator;
pub use time_capped::TimeCappedEstimator;

/// Sentinel returned by an estimator that does not yet have enough samples
/// to produce a meaningful interval. Never a valid interval value itself,
/// since intervals are derived from real recorded timestamps.
pub const NOT_ENOUGH_SAMPLES: u64 = u64::MAX;
