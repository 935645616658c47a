//! Client-side adaptive circuit breaking.
//!
//! This module implements the adaptive throttling scheme from Google's SRE
//! book ("Handling Overload"): the client tracks how many of its recent
//! requests the backend accepted, and once the backend stops keeping up it
//! rejects a matching share of traffic locally instead of piling on.
//!
//! The breaker has no half-open probing phase; the rejection probability
//! decays naturally as accepted requests re-enter the window, so recovery is
//! gradual and self-tuning.

mod sre;

pub use sre::{BreakerConfig, SreBreaker, State};

/// Business-level result of a guarded call, as reported back to the breaker.
///
/// `Success` and `Failure` are the ordinary outcomes. The other two are
/// advisory markers a caller may attach when the plain error/no-error split
/// would mislead the breaker:
/// - `Ignore`: the call failed for reasons that say nothing about backend
///   health (for example a malformed request); counted as a success.
/// - `Drop`: the call was shed before reaching the backend; counted as a
///   failure so the breaker keeps damping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The guarded call completed normally.
    Success,
    /// The guarded call failed in a way that implicates the backend.
    Failure,
    /// Failure that should not count against the backend.
    Ignore,
    /// Locally shed; counts as a failure.
    Drop,
}
