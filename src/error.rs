//! Error types for the cache
//!
//! Provides unified error handling using thiserror. The type is `Clone`
//! because a single worker outcome is delivered to every joined caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cache::Backoff;
use crate::models::ErrorResponse;

// == Cache Error Enum ==
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key not in the cache and no worker to fill it
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The worker returned an error or panicked
    #[error("Worker failed for {key}: {message}")]
    Worker { key: String, message: String },

    /// The worker did not settle within its timeout
    #[error("Worker for {key} timed out after {timeout_ms} ms")]
    Timeout { key: String, timeout_ms: u64 },

    /// A previous worker failed recently and there is nothing cached to serve
    #[error(
        "Waiting for next run for {key}, wait: {}ms from {} until {}",
        .backoff.wait_ms,
        .backoff.started_at,
        .backoff.wait_until
    )]
    Waiting { key: String, backoff: Backoff },

    /// A key pattern could not be compiled
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// The key the error refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::NotFound(key) => Some(key),
            CacheError::Worker { key, .. }
            | CacheError::Timeout { key, .. }
            | CacheError::Waiting { key, .. } => Some(key),
            _ => None,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidPattern(_) | CacheError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            CacheError::Waiting { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Worker { .. } => StatusCode::BAD_GATEWAY,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_waiting_message_references_key_and_window() {
        let err = CacheError::Waiting {
            key: "house/1".to_string(),
            backoff: Backoff::new(Duration::from_millis(10), 100),
        };
        let message = err.to_string();

        assert!(message.contains("house/1"));
        assert!(message.contains("until 110"));
        assert_eq!(err.key(), Some("house/1"));
    }

    #[test]
    fn test_status_codes() {
        let not_found = CacheError::NotFound("k".into()).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let timeout = CacheError::Timeout {
            key: "k".into(),
            timeout_ms: 5,
        }
        .into_response();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
