//! breakwater: in-process service-resilience toolkit.
//!
//! This library provides three cooperating admission-control primitives for
//! backend clients, sharing a rolling time-windowed counter as their
//! statistical substrate:
//!
//! - [`SreBreaker`]: an adaptive circuit breaker using the client-side
//!   throttling formula from Google's SRE book
//! - [`BbrLimiter`]: an adaptive concurrency limiter, inspired by TCP BBR,
//!   that bounds in-flight work by estimated system capacity
//! - [`HotKeyCache`]: a hot-key detector (HeavyKeeper top-k sketch) with a
//!   bounded local value cache
//!
//! # Example
//!
//! ```no_run
//! use breakwater::{BreakerConfig, SreBreaker};
//!
//! let breaker = SreBreaker::new(BreakerConfig::default());
//!
//! match breaker.allow() {
//!     Ok(()) => {
//!         // ... perform the guarded request ...
//!         breaker.mark_success();
//!     }
//!     Err(rejected) => {
//!         // Shed locally; the rejection already counted as a failure.
//!         let _ = rejected;
//!     }
//! }
//! ```
//!
//! # Requirements
//!
//! The admission primitives are synchronous and runtime-agnostic. Only the
//! process-wide CPU sampler ([`spawn_cpu_sampler`]) spawns a background
//! task and therefore must be started from within a Tokio runtime.

#![warn(missing_docs)]

pub mod breaker;
pub mod error;
pub mod hotkey;
pub mod limiter;
pub mod topk;
pub mod window;

// Re-export public API
pub use breaker::{BreakerConfig, Outcome, SreBreaker, State};
pub use error::{ConfigError, LimitExceeded, NotAllowed};
pub use hotkey::{CacheRuleConfig, HotKeyCache, HotKeyOptions, RuleMode};
pub use limiter::{cpu_ema, spawn_cpu_sampler, BbrConfig, BbrLimiter, CpuGetter, Done, Stat};
pub use topk::{HeavyKeeper, Item};
pub use window::RollingCounter;
