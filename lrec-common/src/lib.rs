//! # lrec-common
//!
//! Shared error types and small helpers used across the `lrec-*` crates.

mod error;
pub mod rng;

pub use error::{ConfigError, LatencyStatsError};
