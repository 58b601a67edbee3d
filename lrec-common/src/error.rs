//! Error types shared by the clock, core, and demo crates.
//!
//! ## Design Principles
//! 1. **Fail Fast on Misconfiguration**: Reject bad parameters before any
//!    thread is spawned or histogram is allocated.
//! 2. **Transparent Wrapping**: Surface the underlying `hdrhistogram` error
//!    instead of hiding it behind a generic message.

use hdrhistogram::CreationError;
use hdrhistogram::RecordError;

/// Errors raised while validating configuration, before any state is built.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The observer thread count fell outside the supported range.
    #[error("thread count must be between 1 and 64, got {0}")]
    InvalidThreadCount(usize),

    /// The requested histogram range was rejected by `hdrhistogram`.
    #[error("invalid histogram range: {0}")]
    InvalidHistogramRange(#[from] CreationError),
}

/// Errors surfaced by the latency-stats recorder's hot path.
#[derive(Debug, thiserror::Error)]
pub enum LatencyStatsError {
    /// The histogram rejected a recorded value, most commonly because it was
    /// above the configured `highest_trackable` bound.
    #[error("failed to record latency: {0}")]
    Record(#[from] RecordError),
}
