//! # lrec-core
//!
//! Coordinated-omission-corrected latency statistics.
//!
//! This crate wires together four pieces: a wait-free [`phaser::Phaser`] that
//! lets writers record without blocking while a reader rotates histograms
//! out from under them; a pair of interval estimators
//! ([`estimator::moving_average`], [`estimator::time_capped`]) that track the
//! expected time between recordings; a consensus [`pause`] detector that
//! discovers process-wide stalls; and [`stats::LatencyStats`], the public
//! recorder that ties the three together and synthesizes correction samples
//! for the latencies a stall would otherwise have hidden.

pub mod estimator;
pub mod pause;
pub mod phaser;
pub mod stats;

mod config;
mod histo;

pub use config::LatencyStatsConfig;
pub use stats::LatencyStats;
