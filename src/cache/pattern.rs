//! Invalidation Pattern Module
//!
//! Matchers used to select existing cache keys for removal.

use regex::Regex;

use crate::cache::{encode_segment, KEY_PREFIX};
use crate::error::{CacheError, Result};

// == Invalidation Pattern ==
/// Selects which keys an invalidation removes.
#[derive(Debug, Clone)]
pub enum InvalidationPattern {
    /// Key contains the string anywhere
    Substring(String),
    /// Key starts with the string
    Prefix(String),
    /// Key matches the regular expression
    Regex(Regex),
}

impl InvalidationPattern {
    /// Returns true if `key` is selected by this pattern.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            InvalidationPattern::Substring(s) => key.contains(s.as_str()),
            InvalidationPattern::Prefix(p) => key.starts_with(p.as_str()),
            InvalidationPattern::Regex(re) => re.is_match(key),
        }
    }
}

// == Owner Pattern ==
/// Matches every key of `resource` owned by `owner`, whatever its parameters.
///
/// Unlike a plain substring, `user:A` here does not also select `user:AB`.
pub fn owner_pattern(resource: &str, owner: &str) -> Result<InvalidationPattern> {
    let expr = format!(
        "^{}:{}:user:{}(:|$)",
        regex::escape(KEY_PREFIX),
        regex::escape(&encode_segment(resource)),
        regex::escape(&encode_segment(owner))
    );
    Regex::new(&expr)
        .map(InvalidationPattern::Regex)
        .map_err(|e| CacheError::Internal(format!("owner pattern: {}", e)))
}

impl From<&str> for InvalidationPattern {
    fn from(s: &str) -> Self {
        InvalidationPattern::Substring(s.to_string())
    }
}

impl From<String> for InvalidationPattern {
    fn from(s: String) -> Self {
        InvalidationPattern::Substring(s)
    }
}

impl From<&String> for InvalidationPattern {
    fn from(s: &String) -> Self {
        InvalidationPattern::Substring(s.clone())
    }
}

impl From<Regex> for InvalidationPattern {
    fn from(re: Regex) -> Self {
        InvalidationPattern::Regex(re)
    }
}

impl std::fmt::Display for InvalidationPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationPattern::Substring(s) => write!(f, "*{}*", s),
            InvalidationPattern::Prefix(p) => write!(f, "{}*", p),
            InvalidationPattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}
