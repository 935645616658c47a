//! Error type definitions.
//!
//! This module defines the errors surfaced by the admission-control
//! primitives. Rejections are returned by value at the call site; nothing is
//! recovered internally.

use thiserror::Error;

/// Rejection from the adaptive circuit breaker.
///
/// This is a final verdict for the current window: the breaker has judged the
/// backend unhealthy and is shedding load client-side. Callers should not
/// retry immediately; the rejection itself is recorded as a failure, which is
/// what lets the breaker damp traffic further while the backend recovers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("circuit breaker is open: request not allowed")]
pub struct NotAllowed;

/// Rejection from the concurrency limiter.
///
/// Raised when CPU is saturated and the in-flight count exceeds the estimated
/// capacity of the system. Unlike [`NotAllowed`], this is transient: callers
/// may back off and retry once pressure subsides.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("concurrency limit exceeded")]
pub struct LimitExceeded;

/// Construction-time configuration errors.
///
/// The only fallible construction in the crate is compiling hot-key cache
/// rules; everything else accepts its parameters unconditionally.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A whitelist/blacklist rule carried a pattern that is not a valid
    /// regular expression.
    #[error("invalid cache rule pattern {value:?}: {source}")]
    InvalidPattern {
        /// The offending pattern string.
        value: String,
        /// The underlying regex compilation error.
        source: regex::Error,
    },
}
