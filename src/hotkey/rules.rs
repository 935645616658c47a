//! Cache rule configuration and matching.

use regex::Regex;

use crate::error::ConfigError;

/// How a rule's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// Exact key equality.
    Key,
    /// Regular-expression match.
    Pattern,
}

/// One whitelist/blacklist entry.
#[derive(Debug, Clone)]
pub struct CacheRuleConfig {
    /// Interpretation of `value`.
    pub mode: RuleMode,
    /// Literal key or pattern source, per `mode`.
    pub value: String,
    /// Cache TTL for keys matched by this rule, in milliseconds. Zero
    /// inherits the cache-wide default.
    pub ttl_ms: u64,
}

impl CacheRuleConfig {
    /// Convenience constructor for a literal-key rule.
    pub fn key(value: impl Into<String>, ttl_ms: u64) -> Self {
        CacheRuleConfig {
            mode: RuleMode::Key,
            value: value.into(),
            ttl_ms,
        }
    }

    /// Convenience constructor for a pattern rule.
    pub fn pattern(value: impl Into<String>, ttl_ms: u64) -> Self {
        CacheRuleConfig {
            mode: RuleMode::Pattern,
            value: value.into(),
            ttl_ms,
        }
    }
}

/// A compiled rule ready for matching.
pub(crate) enum CacheRule {
    Key { value: String, ttl_ms: u64 },
    Pattern { regex: Regex, ttl_ms: u64 },
}

impl CacheRule {
    pub(crate) fn matches(&self, key: &str) -> bool {
        match self {
            CacheRule::Key { value, .. } => value == key,
            CacheRule::Pattern { regex, .. } => regex.is_match(key),
        }
    }

    pub(crate) fn ttl_ms(&self) -> u64 {
        match self {
            CacheRule::Key { ttl_ms, .. } | CacheRule::Pattern { ttl_ms, .. } => *ttl_ms,
        }
    }
}

/// Compiles a rule list, substituting `default_ttl_ms` for zero TTLs.
pub(crate) fn compile_rules(
    configs: &[CacheRuleConfig],
    default_ttl_ms: u64,
) -> Result<Vec<CacheRule>, ConfigError> {
    configs
        .iter()
        .map(|config| {
            let ttl_ms = if config.ttl_ms == 0 {
                default_ttl_ms
            } else {
                config.ttl_ms
            };
            match config.mode {
                RuleMode::Key => Ok(CacheRule::Key {
                    value: config.value.clone(),
                    ttl_ms,
                }),
                RuleMode::Pattern => match Regex::new(&config.value) {
                    Ok(regex) => Ok(CacheRule::Pattern { regex, ttl_ms }),
                    Err(source) => Err(ConfigError::InvalidPattern {
                        value: config.value.clone(),
                        source,
                    }),
                },
            }
        })
        .collect()
}

/// First-hit match over a rule list; `None` when nothing matches (an empty
/// list matches nothing, not everything).
pub(crate) fn first_match<'a>(rules: &'a [CacheRule], key: &str) -> Option<&'a CacheRule> {
    rules.iter().find(|rule| rule.matches(key))
}
