//! Hot-key cache: HeavyKeeper detection plus a local value cache.

use log::debug;
use parking_lot::Mutex;

use super::local_cache::LocalCache;
use super::rules::{compile_rules, first_match, CacheRule, CacheRuleConfig};
use crate::error::ConfigError;
use crate::topk::{HeavyKeeper, Item};

/// Sketch geometry: rows of independent hashes, and the decay that erodes
/// colliding keys.
const SKETCH_DEPTH: usize = 4;
const SKETCH_DECAY: f64 = 0.925;
const SKETCH_WIDTH_BASE: usize = 1024;

/// Options for [`HotKeyCache`].
#[derive(Debug, Clone, Default)]
pub struct HotKeyOptions {
    /// Top-k size of the detector. Zero disables detection entirely, which
    /// is useful for a purely whitelist-driven cache.
    pub hot_key_cnt: usize,
    /// Capacity of the local value cache. Zero means unbounded.
    pub local_cache_cnt: usize,
    /// Cache the value of every key the sketch promotes to hot.
    pub auto_cache: bool,
    /// Default TTL for cached values, in milliseconds.
    pub cache_ms: u64,
    /// Minimum estimated count before a key may be considered hot.
    pub min_count: u32,
    /// Keys cached on every write regardless of hotness.
    pub white_list: Vec<CacheRuleConfig>,
    /// Keys never auto-cached, however hot.
    pub black_list: Vec<CacheRuleConfig>,
}

struct CacheState {
    topk: Option<HeavyKeeper>,
    values: Option<LocalCache>,
}

/// Detector for hot keys with an attached local cache.
///
/// Writes flow through [`add_with_value`]: the key feeds the sketch, and the
/// value lands in the local cache when the key is hot (auto-cache mode) or
/// whitelisted. Keys expelled from the top-k drop out of the cache with
/// them, so the cache tracks the *current* hot set rather than an
/// ever-growing historical one.
///
/// A single mutex serializes all state: the sketch is not internally
/// synchronized, and even reads reorder the LRU.
///
/// [`add_with_value`]: HotKeyCache::add_with_value
pub struct HotKeyCache {
    state: Mutex<CacheState>,
    auto_cache: bool,
    cache_ms: u64,
    whitelist: Vec<CacheRule>,
    blacklist: Vec<CacheRule>,
}

impl HotKeyCache {
    /// Builds a cache from `options`.
    ///
    /// Fails only when a rule pattern does not compile.
    pub fn new(options: HotKeyOptions) -> Result<Self, ConfigError> {
        let whitelist = compile_rules(&options.white_list, options.cache_ms)?;
        let blacklist = compile_rules(&options.black_list, options.cache_ms)?;

        let topk = (options.hot_key_cnt > 0).then(|| {
            // Wider grids for larger k keep the collision rate flat.
            let factor = ((options.hot_key_cnt as f64).ln() as usize).max(1);
            HeavyKeeper::new(
                options.hot_key_cnt as u32,
                SKETCH_WIDTH_BASE * factor,
                SKETCH_DEPTH,
                SKETCH_DECAY,
                options.min_count,
            )
        });
        let values = (options.auto_cache || !whitelist.is_empty())
            .then(|| LocalCache::new(options.local_cache_cnt));
        debug!(
            "hot-key cache ready: top-{} detector, {} whitelist / {} blacklist rules",
            options.hot_key_cnt,
            whitelist.len(),
            blacklist.len()
        );

        Ok(HotKeyCache {
            state: Mutex::new(CacheState { topk, values }),
            auto_cache: options.auto_cache,
            cache_ms: options.cache_ms,
            whitelist,
            blacklist,
        })
    }

    /// Feeds `incr` occurrences of `key` into the detector.
    ///
    /// Returns whether the key is hot (a top-k member) after this add.
    pub fn add(&self, key: &str, incr: u32) -> bool {
        let mut state = self.state.lock();
        match state.topk.as_mut() {
            Some(topk) => topk.add(key, incr).1,
            None => false,
        }
    }

    /// Feeds the detector and maintains the local cache.
    ///
    /// Side effects, in order: a key expelled from the top-k is removed from
    /// the cache; in auto-cache mode a hot, non-blacklisted key is cached
    /// under the default TTL; and independently of hotness a whitelisted key
    /// is cached under its rule's TTL. Returns whether the key is hot.
    pub fn add_with_value(&self, key: &str, value: &str, incr: u32) -> bool {
        let mut state = self.state.lock();
        let CacheState { topk, values } = &mut *state;
        let mut hot = false;
        if let Some(topk) = topk.as_mut() {
            let (expelled, promoted) = topk.add(key, incr);
            hot = promoted;
            if let (Some(evicted), Some(values)) = (expelled, values.as_mut()) {
                values.remove(&evicted.key);
            }
            if self.auto_cache && hot {
                if first_match(&self.blacklist, key).is_none() {
                    if let Some(values) = values.as_mut() {
                        values.add(key, value.to_string(), self.cache_ms);
                    }
                }
                return hot;
            }
        }
        if let Some(rule) = first_match(&self.whitelist, key) {
            if let Some(values) = values.as_mut() {
                values.add(key, value.to_string(), rule.ttl_ms());
            }
        }
        hot
    }

    /// Looks up a cached value, honouring TTL expiry.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().values.as_mut()?.get(key)
    }

    /// Removes `key` from the local cache unconditionally.
    pub fn del_cache(&self, key: &str) {
        if let Some(values) = self.state.lock().values.as_mut() {
            values.remove(key);
        }
    }

    /// Current hot-key ranking, highest count first.
    pub fn list(&self) -> Vec<Item> {
        self.state
            .lock()
            .topk
            .as_ref()
            .map_or_else(Vec::new, |topk| topk.list())
    }

    /// Halves all detector counts, weighting recent traffic over old.
    pub fn fading(&self) {
        if let Some(topk) = self.state.lock().topk.as_mut() {
            topk.fading();
        }
    }
}
