//! # Synthetic Workload Generator
//!
//! Purpose: drive `lrec-core::LatencyStats` with a reproducible workload and
//! report what it recorded, the way `hkv-engine`'s `bench_engine` binary
//! drives `MemoryEngine` — but exercising the coordinated-omission pipeline
//! end to end instead of a single histogram.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: fixed-seed xorshift, same generator the
//!    benchmark harness uses, so a run is reproducible across machines.
//! 2. **Two Clock Modes**: `--real` drives the process clock and sleeps for
//!    real; the default virtual mode drives a `VirtualClock` so the whole
//!    run finishes in milliseconds regardless of the simulated duration.
//! 3. **Pause Injection Is Explicit**: a pause is only ever injected at a
//!    caller-chosen point, never implicitly, so a report can always be
//!    traced back to what produced it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hdrhistogram::serialization::interval_log::{IntervalLogHeaderWriter, Tag};
use hdrhistogram::serialization::V2Serializer;
use hdrhistogram::Histogram;

use lrec_clock::{Clock, RealClock, SharedClock, VirtualClock};
use lrec_common::rng::XorShift64;
use lrec_core::pause::{PauseDetector, SimplePauseDetector, SimplePauseDetectorConfig};
use lrec_core::{LatencyStats, LatencyStatsConfig};

const DEFAULT_OP_COUNT: usize = 50_000;
const DEFAULT_MEAN_INTERVAL_NANOS: u64 = 1_000_000;
const DEFAULT_JITTER_PERCENT: u64 = 20;
const WORKLOAD_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

struct CliConfig {
    op_count: usize,
    mean_interval_nanos: u64,
    jitter_percent: u64,
    pause_nanos: u64,
    pause_after_ops: usize,
    real_clock: bool,
    log_format: bool,
}

impl CliConfig {
    fn from_args() -> Self {
        let mut config = CliConfig {
            op_count: DEFAULT_OP_COUNT,
            mean_interval_nanos: DEFAULT_MEAN_INTERVAL_NANOS,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            pause_nanos: 0,
            pause_after_ops: 0,
            real_clock: false,
            log_format: false,
        };

        for arg in std::env::args().skip(1) {
            if let Some(value) = arg.strip_prefix("--ops=") {
                config.op_count = parse_or(value, config.op_count);
            } else if let Some(value) = arg.strip_prefix("--interval-nanos=") {
                config.mean_interval_nanos = parse_or(value, config.mean_interval_nanos);
            } else if let Some(value) = arg.strip_prefix("--jitter-percent=") {
                config.jitter_percent = parse_or(value, config.jitter_percent);
            } else if let Some(value) = arg.strip_prefix("--pause-nanos=") {
                config.pause_nanos = parse_or(value, config.pause_nanos);
            } else if let Some(value) = arg.strip_prefix("--pause-after=") {
                config.pause_after_ops = parse_or(value, config.pause_after_ops);
            } else if arg == "--real" {
                config.real_clock = true;
            } else if arg == "--log" {
                config.log_format = true;
            }
        }

        config
    }
}

fn parse_or<T: std::str::FromStr>(raw: &str, fallback: T) -> T {
    raw.parse().unwrap_or(fallback)
}

/// Interval of a few nanoseconds to a few seconds, jittered by up to
/// `jitter_percent` of `mean_nanos` in either direction, floored at 1ns.
fn jittered_interval(rng: &mut XorShift64, mean_nanos: u64, jitter_percent: u64) -> u64 {
    if jitter_percent == 0 || mean_nanos == 0 {
        return mean_nanos.max(1);
    }
    let span = (mean_nanos * jitter_percent.min(100)) / 100;
    let offset = rng.next_below(2 * span + 1) as i64 - span as i64;
    (mean_nanos as i64 + offset).max(1) as u64
}

fn main() {
    let _ = tracing_subscriber::fmt::try_init();
    if let Err(err) = run(CliConfig::from_args()) {
        eprintln!("lrec-cli failed: {err:#}");
        std::process::exit(1);
    }
}

fn run(config: CliConfig) -> Result<()> {
    if config.real_clock {
        run_real(config)
    } else {
        run_virtual(config)
    }
}

fn run_virtual(config: CliConfig) -> Result<()> {
    let clock = VirtualClock::new();
    let shared_clock: SharedClock = Arc::new(clock.clone());
    let detector_config = SimplePauseDetectorConfig {
        sleep_interval_nanos: 100_000,
        ..SimplePauseDetectorConfig::default()
    };
    let detector = Arc::new(SimplePauseDetector::with_clock(
        detector_config,
        Arc::clone(&shared_clock),
    )?);
    let stats = LatencyStats::with_clock_and_detector(
        LatencyStatsConfig::default(),
        Arc::clone(&shared_clock),
        Arc::clone(&detector) as Arc<dyn PauseDetector>,
    )?;

    let mut rng = XorShift64::new(WORKLOAD_SEED);
    for op in 0..config.op_count {
        clock.move_time_forward(jittered_interval(
            &mut rng,
            config.mean_interval_nanos,
            config.jitter_percent,
        ));

        if config.pause_nanos > 0 && op == config.pause_after_ops {
            clock.move_time_forward(config.pause_nanos);
        }

        let started = clock.now_nanos();
        let service_nanos =
            jittered_interval(&mut rng, (config.mean_interval_nanos / 10).max(1), 50);
        clock.move_time_forward(service_nanos);
        stats.record_latency(clock.now_nanos() - started).ok();
    }

    report(&stats, config.log_format)?;

    stats.stop();
    drop(stats);
    if let Ok(detector) = Arc::try_unwrap(detector) {
        detector.stop();
    }
    Ok(())
}

fn run_real(config: CliConfig) -> Result<()> {
    let shared_clock: SharedClock = Arc::new(RealClock::default());
    let detector_config = SimplePauseDetectorConfig::default();
    let detector_threads = detector_config.threads;
    let detector = Arc::new(SimplePauseDetector::with_clock(
        detector_config,
        Arc::clone(&shared_clock),
    )?);
    let stats = LatencyStats::with_clock_and_detector(
        LatencyStatsConfig::default(),
        Arc::clone(&shared_clock),
        Arc::clone(&detector) as Arc<dyn PauseDetector>,
    )?;

    let mut rng = XorShift64::new(WORKLOAD_SEED);
    for op in 0..config.op_count {
        std::thread::sleep(Duration::from_nanos(jittered_interval(
            &mut rng,
            config.mean_interval_nanos,
            config.jitter_percent,
        )));

        if config.pause_nanos > 0 && op == config.pause_after_ops {
            // Stall every observer thread for the pause's real duration, so
            // the consensus loop sees the same kind of wall-clock gap a
            // genuine stop-the-world pause would produce, rather than one
            // only this thread experienced.
            for index in 0..detector_threads {
                detector.stall_thread(index);
            }
            std::thread::sleep(Duration::from_nanos(config.pause_nanos));
            for index in 0..detector_threads {
                detector.release_thread(index);
            }
        }

        let started = std::time::Instant::now();
        let service_nanos =
            jittered_interval(&mut rng, (config.mean_interval_nanos / 10).max(1), 50);
        std::thread::sleep(Duration::from_nanos(service_nanos));
        stats.record_latency(started.elapsed().as_nanos() as u64).ok();
    }

    // Give the dispatcher a moment to drain the pause notification before
    // we rotate and read the histograms it may have corrected.
    std::thread::sleep(Duration::from_millis(50));
    report(&stats, config.log_format)?;

    stats.stop();
    drop(stats);
    if let Ok(detector) = Arc::try_unwrap(detector) {
        detector.stop();
    }
    Ok(())
}

fn report(stats: &LatencyStats, log_format: bool) -> Result<()> {
    let (raw, corrections) = stats.get_separate_interval_histograms();
    if log_format {
        write_interval_log(&raw, &corrections)
    } else {
        print_summary(&raw, &corrections);
        Ok(())
    }
}

fn print_summary(raw: &Histogram<u64>, corrections: &Histogram<u64>) {
    println!("raw        : {}", percentile_line(raw));
    println!("corrections: {}", percentile_line(corrections));
}

fn percentile_line(histogram: &Histogram<u64>) -> String {
    if histogram.len() == 0 {
        return "count=0".to_string();
    }
    format!(
        "count={} mean={:.1}ns p50={}ns p99={}ns p99.9={}ns max={}ns",
        histogram.len(),
        histogram.mean(),
        histogram.value_at_percentile(50.0),
        histogram.value_at_percentile(99.0),
        histogram.value_at_percentile(99.9),
        histogram.max(),
    )
}

fn write_interval_log(raw: &Histogram<u64>, corrections: &Histogram<u64>) -> Result<()> {
    let mut serializer = V2Serializer::new();
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let header = IntervalLogHeaderWriter::new(&mut handle, &mut serializer);
    let mut writer = header.into_log_writer();

    let raw_tag = Tag::new("raw").expect("'raw' has no disallowed characters");
    let corrections_tag = Tag::new("corrections").expect("'corrections' has no disallowed characters");

    writer
        .write_histogram(raw, 0.0, 0.0, Some(raw_tag), 1.0)
        .map_err(|err| anyhow::anyhow!("failed to write raw interval: {err:?}"))
        .context("writing interval log")?;
    writer
        .write_histogram(corrections, 0.0, 0.0, Some(corrections_tag), 1.0)
        .map_err(|err| anyhow::anyhow!("failed to write corrections interval: {err:?}"))
        .context("writing interval log")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_never_produces_zero() {
        let mut rng = XorShift64::new(1);
        for _ in 0..1_000 {
            assert!(jittered_interval(&mut rng, 1_000, 80) >= 1);
        }
    }

    #[test]
    fn zero_jitter_returns_the_mean() {
        let mut rng = XorShift64::new(1);
        assert_eq!(jittered_interval(&mut rng, 5_000, 0), 5_000);
    }

    #[test]
    fn parse_or_falls_back_on_bad_input() {
        assert_eq!(parse_or::<usize>("not a number", 42), 42);
        assert_eq!(parse_or::<usize>("7", 42), 7);
    }
}
