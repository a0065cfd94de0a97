//! API Handlers
//!
//! HTTP request handlers. Read endpoints go through the response cache;
//! write endpoints invalidate the affected owner's entries afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::backend::{Backend, Filter, MemoryBackend};
use crate::cache::{build_key, owner_pattern, CacheStats, CacheStatus, ResponseCache};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, CreateDeadlineRequest, DeleteResponse, HealthResponse, InvalidateRequest,
    InvalidateResponse,
};

/// Header carrying the caller's identity, set by the session layer in front
pub const USER_ID_HEADER: &str = "x-user-id";

/// Diagnostic header reporting how a response was served
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache-status");

const DEADLINES: &str = "deadlines";
const SCHOOLS: &str = "schools";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide response cache
    pub cache: ResponseCache<Value>,
    /// Data source behind the cached endpoints
    pub backend: Arc<dyn Backend>,
    /// TTL for per-user lists
    pub user_list_ttl: Duration,
    /// TTL for reference data
    pub reference_ttl: Duration,
}

impl AppState {
    /// Creates a new AppState with the given cache and backend.
    pub fn new(cache: ResponseCache<Value>, backend: Arc<dyn Backend>) -> Self {
        let defaults = Config::default();
        Self {
            cache,
            backend,
            user_list_ttl: defaults.user_list_ttl,
            reference_ttl: defaults.reference_ttl,
        }
    }

    /// Creates a new AppState from configuration, backed by an in-memory store.
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache: ResponseCache::from_config(config),
            backend: Arc::new(MemoryBackend::new()),
            user_list_ttl: config.user_list_ttl,
            reference_ttl: config.reference_ttl,
        }
    }
}

// == Current User ==
/// Authenticated caller, read from the `x-user-id` header.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = CacheError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_string()))
            .ok_or_else(|| CacheError::Unauthorized("missing user identity".to_string()))
    }
}

/// Builds a JSON response with cache headers derived from `ttl`.
fn cached_json(data: Value, status: CacheStatus, ttl: Duration) -> Response {
    let max_age = ttl.as_secs();
    let cache_control = format!(
        "public, max-age={}, stale-while-revalidate={}",
        max_age,
        max_age / 2
    );

    (
        [
            (header::CACHE_CONTROL, cache_control),
            (CACHE_STATUS_HEADER, status.as_header_value().to_string()),
        ],
        Json(data),
    )
        .into_response()
}

/// Turns query parameters into equality conditions.
fn filter_from(params: &BTreeMap<String, String>) -> Filter {
    params
        .iter()
        .fold(Filter::new(), |filter, (field, value)| filter.eq(field.as_str(), value.as_str()))
}

async fn load_rows(
    backend: Arc<dyn Backend>,
    table: &'static str,
    filter: Filter,
) -> anyhow::Result<Value> {
    let rows = backend.query(table, &filter).await?;
    Ok(json!({ table: rows }))
}

/// Handler for GET /api/deadlines
///
/// Per-user list, cached for the user list TTL.
pub async fn list_deadlines_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response> {
    let key = build_key(DEADLINES, Some(user.as_str()), Some(&params))?;
    let filter = filter_from(&params).eq("user_id", user.as_str());
    let backend = state.backend.clone();

    let (data, status) = state
        .cache
        .get_or_fetch_with_status(
            &key,
            move || load_rows(backend, DEADLINES, filter),
            state.user_list_ttl,
        )
        .await?;

    Ok(cached_json(data, status, state.user_list_ttl))
}

/// Handler for POST /api/deadlines
///
/// Stores a deadline and invalidates the caller's cached deadline lists.
pub async fn create_deadline_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateDeadlineRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let record = json!({
        "user_id": &user,
        "title": req.title,
        "due_date": req.due_date,
        "school_id": req.school_id,
        "notes": req.notes,
    });
    let stored = state.backend.insert(DEADLINES, record).await?;

    let removed = state.cache.invalidate(owner_pattern(DEADLINES, &user)?);
    info!(user = %user, removed, "Deadline created, cache invalidated");

    Ok((StatusCode::CREATED, Json(stored)))
}

/// Handler for DELETE /api/deadlines/:id
pub async fn delete_deadline_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let owner = Filter::new().eq("user_id", user.as_str());
    state.backend.delete(DEADLINES, &id, &owner).await?;

    let removed = state.cache.invalidate(owner_pattern(DEADLINES, &user)?);
    info!(user = %user, removed, "Deadline deleted, cache invalidated");

    Ok(Json(DeleteResponse::new(id)))
}

/// Handler for GET /api/schools
///
/// Reference data shared by all users, cached for the reference TTL.
pub async fn list_schools_handler(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response> {
    let key = build_key(SCHOOLS, None, Some(&params))?;
    let filter = filter_from(&params);
    let backend = state.backend.clone();

    let (data, status) = state
        .cache
        .get_or_fetch_with_status(
            &key,
            move || load_rows(backend, SCHOOLS, filter),
            state.reference_ttl,
        )
        .await?;

    Ok(cached_json(data, status, state.reference_ttl))
}

/// Handler for GET /cache/stats
pub async fn cache_stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// Handler for POST /cache/invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    let pattern = req.to_pattern().map_err(CacheError::InvalidRequest)?;
    let description = pattern.to_string();
    let removed = state.cache.invalidate(pattern);

    Ok(Json(InvalidateResponse {
        pattern: description,
        removed,
    }))
}

/// Handler for DELETE /cache
pub async fn clear_cache_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.cache.clear();
    info!("Cache cleared");
    Json(ClearResponse::new())
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
