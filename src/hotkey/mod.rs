//! Hot-key detection with a bounded local cache.
//!
//! This module composes the HeavyKeeper sketch with an LRU-with-TTL cache:
//! the sketch decides which keys are hot, and the cache keeps their values
//! close so hot reads stop hammering the backing store. Rule lists refine
//! the behavior:
//! - Whitelisted keys are cached on every write, hot or not
//! - Blacklisted keys are never auto-cached, however hot they get
//!
//! Rules match either a literal key or a regular expression; invalid
//! patterns fail construction.

mod cache;
mod local_cache;
mod rules;

pub use cache::{HotKeyCache, HotKeyOptions};
pub use rules::{CacheRuleConfig, RuleMode};
