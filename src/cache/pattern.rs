//! Key Pattern Module
//!
//! Glob-like key patterns used by `expire` and the debug search filter.
//! `*` matches any run of characters; everything else, `?` included, is literal.

use regex::Regex;

use crate::error::{CacheError, Result};

/// Compiles a key pattern into an unanchored regex.
pub fn compile(pattern: &str) -> Result<Regex> {
    let escaped = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&escaped).map_err(|err| CacheError::InvalidPattern(format!("{pattern}: {err}")))
}

/// Compiles several patterns, failing on the first invalid one.
pub fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile(p.as_ref())).collect()
}
