//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;

use crate::cache::{Cache, DebugInfo, DebugOptions};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DebugQuery, DeleteResponse, EntryResponse, ExpireRequest, ExpireResponse,
    HealthResponse, KeysResponse, SetRequest, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
///
/// The cache handle is cheap to clone and synchronizes internally.
#[derive(Clone)]
pub struct AppState {
    pub cache: Cache<Value>,
}

impl AppState {
    pub fn new(cache: Cache<Value>) -> Self {
        Self { cache }
    }

    /// Creates a new AppState with a plain cache built from the configuration.
    pub fn from_config(config: &Config) -> Self {
        let span = tracing::info_span!("cache", name = %config.cache.name, port = config.server_port);
        Self::new(Cache::builder(config.cache.clone()).with_span(span).build())
    }
}

/// Handler for GET /entries/:key
///
/// Classify-only read: returns the entry with origin `hit` or `stale`.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<EntryResponse>> {
    let entry = state
        .cache
        .lookup(&key)
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(EntryResponse::new(key, entry)))
}

/// Handler for PUT /entries
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl_ms.map(Duration::from_millis);
    state.cache.set(&req.key, req.value, ttl).await;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for DELETE /entries/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.cache.del(&key).await {
        return Err(CacheError::NotFound(key));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for DELETE /entries
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let cleared = state.cache.len();
    state.cache.clear().await;

    Json(ClearResponse { cleared })
}

/// Handler for POST /expire
pub async fn expire_handler(
    State(state): State<AppState>,
    Json(req): Json<ExpireRequest>,
) -> Result<Json<ExpireResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let expired = state.cache.expire(&req.patterns).await?;

    Ok(Json(ExpireResponse {
        patterns: req.patterns,
        expired,
    }))
}

/// Handler for GET /keys
pub async fn keys_handler(State(state): State<AppState>) -> Json<KeysResponse> {
    Json(KeysResponse::new(state.cache.keys()))
}

/// Handler for GET /debug
pub async fn debug_handler(
    State(state): State<AppState>,
    Query(query): Query<DebugQuery>,
) -> Result<Json<DebugInfo<Value>>> {
    let mut options = DebugOptions::new().full(query.full);
    if let Some(search) = query.search {
        options = options.search(search);
    }

    Ok(Json(state.cache.debug(options).await?))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
