//! Benchmark utilities for the map runtime.
//!
//! - **Microbenchmarks**: grid loading, respawn scheduling, area visits and relocation
//! - **Scenario benchmarks**: whole map ticks for a populated zone and a respawn storm
//! - **Tick timing**: per-tick latency statistics for long runs
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench -p rusty_world_bench
//! cargo bench -p rusty_world_bench -- respawn
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports.

pub mod behaviors;
pub mod scenarios;
pub mod tick_timer;
