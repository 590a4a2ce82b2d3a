//! Name validation helpers.
//!
//! Column names, index names, table names and placeholder names are checked
//! against fixed patterns before any SQL is built from them.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;

/// Lowercase identifier: starts with a letter, never ends with `_`.
pub const IDENTIFIER_PATTERN: &str = r"^[a-z](?:[a-z0-9_]*[a-z0-9])?$";

/// Named placeholder: `:` followed by a word that does not start with a digit.
pub const PLACEHOLDER_PATTERN: &str = r"^:[A-Za-z_][A-Za-z0-9_]*$";

/// Thread-safe cache of compiled patterns.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern.
///
/// An invalid pattern is logged and treated as a non-match.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern, treating as non-match"
            );
            false
        }
    }
}

/// Whether `name` is usable as a column, index or table name.
pub fn is_identifier(name: &str) -> bool {
    matches_pattern(name, IDENTIFIER_PATTERN)
}

/// Whether `name` is a well-formed placeholder key (`:name`).
pub fn is_placeholder(name: &str) -> bool {
    matches_pattern(name, PLACEHOLDER_PATTERN)
}
