//! API Module
//!
//! HTTP handlers and routing for the cached REST API.
//!
//! # Endpoints
//! - `GET /api/deadlines` - Caller's deadlines (cached per user)
//! - `POST /api/deadlines` - Create a deadline, invalidating the caller's lists
//! - `DELETE /api/deadlines/:id` - Delete a deadline, invalidating the caller's lists
//! - `GET /api/schools` - School reference data (cached, shared)
//! - `GET /cache/stats` - Cache diagnostics
//! - `POST /cache/invalidate` - Invalidate entries by substring or regex
//! - `DELETE /cache` - Clear the cache
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
