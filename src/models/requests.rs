//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Request body for PUT /entries
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// Any JSON value
    pub value: Value,
    /// Optional TTL in milliseconds (uses the cache default if not specified)
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Request body for POST /expire
#[derive(Debug, Clone, Deserialize)]
pub struct ExpireRequest {
    /// Key patterns, `*` matches any run of characters
    pub patterns: Vec<String>,
}

impl ExpireRequest {
    pub fn validate(&self) -> Option<String> {
        if self.patterns.is_empty() {
            return Some("At least one pattern is required".to_string());
        }
        self.patterns.iter().find_map(|p| validate_key(p))
    }
}

/// Query string of GET /debug
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugQuery {
    /// Include values
    #[serde(default)]
    pub full: bool,
    /// Only list keys matching this pattern
    #[serde(default)]
    pub search: Option<String>,
}

fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {MAX_KEY_LENGTH} characters"
        ));
    }
    None
}
