//! Error types for the response cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::backend::BackendError;
use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache and the HTTP layer around it.
///
/// The type is `Clone` because a single producer outcome is handed to every
/// caller waiting on the same in-flight fetch.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Parameters could not be turned into a canonical cache key
    #[error("Key serialization failed: {0}")]
    KeySerialization(String),

    /// The wrapped fetch operation failed
    #[error("Producer failed: {0}")]
    ProducerFailure(Arc<anyhow::Error>),

    /// The wrapped fetch operation did not settle in time
    #[error("Fetch timed out for key: {0}")]
    FetchTimeout(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid caller identity
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps any producer error so it can be shared between waiters.
    pub fn producer(err: impl Into<anyhow::Error>) -> Self {
        CacheError::ProducerFailure(Arc::new(err.into()))
    }
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(msg) => CacheError::NotFound(msg),
            other => CacheError::Internal(other.to_string()),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CacheError::KeySerialization(msg) => {
                error!("Cache key serialization failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            CacheError::ProducerFailure(err) => {
                error!("Cached response error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            CacheError::FetchTimeout(key) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("Upstream fetch timed out for {}", key),
            ),
            CacheError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            CacheError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CacheError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            CacheError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(ErrorResponse::new(message));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
