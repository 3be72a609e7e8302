//! API Module
//!
//! HTTP handlers and routing for the demo cache server.
//!
//! # Endpoints
//! - `GET /entries/:key` - Classify-only read of an entry
//! - `PUT /entries` - Store a JSON value
//! - `DELETE /entries/:key` - Delete a key
//! - `DELETE /entries` - Clear the cache
//! - `POST /expire` - Mark keys matching patterns stale
//! - `GET /keys` - List keys, most recently used first
//! - `GET /debug` - Diagnostic snapshot
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
