//! Adaptive concurrency limiting.
//!
//! This module bounds in-flight work the way TCP BBR bounds data in flight:
//! estimate the system's bottleneck throughput (max passes per bucket) and
//! its base latency (min round-trip per bucket), multiply them into an
//! estimated capacity, and shed load only when the CPU is saturated *and*
//! the in-flight count exceeds that capacity.
//!
//! CPU saturation is read from a process-wide exponential moving average
//! maintained by a single background sampler task; see [`spawn_cpu_sampler`].

mod bbr;
mod cpu;

pub use bbr::{BbrConfig, BbrLimiter, Done, Stat};
pub use cpu::{cpu_ema, spawn_cpu_sampler, CpuGetter};
