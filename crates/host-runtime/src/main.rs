//! Host Runtime - Main Entry Point
//!
//! Plays the part of the device firmware: greets the harness, runs the
//! model once, profiles it, then benchmarks iterated runs.

mod clock;
mod config;

use crate::config::HostConfig;
use harness::ffi::{ProfileModelFromRust, RunModelFromRust, SayHello};
use harness::{
    init_logging, profile_memory_and_latency, HarnessConfig, EXAMPLE_MODEL, PROFILE_ARENA_SIZE,
};
use timing_bridge::{ticks_to_micros, HostClock};
use tracing::{debug, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let harness_config = HarnessConfig::load()?;
    init_logging(&harness_config.log_level);
    let host = HostConfig::load()?;

    info!("=== Host Runtime v{} ===", env!("CARGO_PKG_VERSION"));

    SayHello();
    let status = RunModelFromRust(1);
    info!("Ran model: return status {}", status);

    let status = ProfileModelFromRust();
    info!("Profiled model: return status {}", status);

    if host.report_json {
        let mut arena = vec![0u8; PROFILE_ARENA_SIZE];
        let report = profile_memory_and_latency(&mut arena, EXAMPLE_MODEL, HostClock)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    for round in 0..host.bench_rounds {
        debug!("Benchmark round {}", round + 1);
        let start = clock::current_time_ticks();
        let status = RunModelFromRust(host.bench_iterations);
        let elapsed = clock::current_time_ticks().wrapping_sub(start);
        if status != 0 {
            warn!("Benchmark run failed with status {}", status);
            continue;
        }

        let micros = ticks_to_micros(elapsed as u64, clock::ticks_per_second());
        let avg_ms = micros as f64 / 1000.0 / host.bench_iterations.max(1) as f64;
        info!("{} iters: avg {:.3}ms/iter", host.bench_iterations, avg_ms);
    }

    Ok(())
}
