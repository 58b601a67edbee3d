//! Configuration for [`crate::stats::LatencyStats`].
//!
//! Mirrors the teacher's plain-struct-plus-`Default` config shape: public
//! fields, documented defaults, and a fallible `validate()` that rejects a
//! bad histogram range before any histogram is allocated.

use lrec_common::ConfigError;

/// Constructor parameters for a `LatencyStats` recorder, in nanoseconds
/// unless noted.
#[derive(Debug, Clone)]
pub struct LatencyStatsConfig {
    /// Smallest value the underlying histograms can discriminate.
    pub lowest_trackable_value: u64,
    /// Largest value the underlying histograms can discriminate.
    pub highest_trackable_value: u64,
    /// Number of significant decimal digits of precision to preserve.
    pub significant_digits: u8,
    /// Sample count of the interval estimator's ring buffer, rounded up to
    /// the next power of two.
    pub estimator_window: usize,
    /// Base time cap of the interval estimator, before any pause inflates it.
    pub estimator_time_cap_nanos: u64,
}

impl Default for LatencyStatsConfig {
    fn default() -> Self {
        LatencyStatsConfig {
            lowest_trackable_value: 1_000,
            highest_trackable_value: 3_600_000_000_000,
            significant_digits: 2,
            estimator_window: 1024,
            estimator_time_cap_nanos: 10_000_000_000,
        }
    }
}

impl LatencyStatsConfig {
    /// Validates the histogram range by attempting to construct one,
    /// before any `LatencyStats` thread or buffer is allocated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        hdrhistogram::Histogram::<u64>::new_with_bounds(
            self.lowest_trackable_value,
            self.highest_trackable_value,
            self.significant_digits,
        )
        .map(|_| ())
        .map_err(ConfigError::InvalidHistogramRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        LatencyStatsConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_an_inverted_range() {
        let config = LatencyStatsConfig {
            lowest_trackable_value: 1_000_000,
            highest_trackable_value: 1_000,
            ..LatencyStatsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
