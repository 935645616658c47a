//! Time-bucketed sliding window statistics.
//!
//! This module provides the statistical substrate shared by the breaker and
//! the limiter: a ring of fixed-duration buckets covering a rolling window,
//! where each bucket aggregates the samples recorded during its time slice.
//! Reads and writes advance the window from the wall clock; there is no
//! background sweeper, and samples older than the window are never
//! observable.

mod bucket;
mod counter;

pub use bucket::Bucket;
pub use counter::{Iter, RollingCounter};
