//! HTTP query service.
//!
//! A thin JSON adapter over a [`PostcodeStore`]. Every query result is
//! memoized in a [`TtlCache`] keyed by the normalized request.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/postcode/lookup?postcode=` | Coordinates of one postcode |
//! | `GET`  | `/postcode/radius?postcode=&radius=` | Postcodes within `radius` meters, nearest first |
//! | `GET`  | `/postcode/distance?from=&to=` | Great-circle meters between two postcodes |
//!
//! # Response Envelope
//!
//! ```json
//! { "success": true, "data": { "postcode": "SW1A 1AA", "latitude": 51.501009, ... } }
//! { "success": false, "code": "not_found", "message": "Postcode not found" }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! A radius search around an unknown postcode is not an error: it returns
//! an empty list.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use postcode_locator_core::models::{PostcodeView, PostcodeWithDistance};
use postcode_locator_core::postcode::normalize;
use postcode_locator_core::store::PostcodeStore;

use crate::cache::TtlCache;
use crate::config::{CacheConfig, Config};
use crate::db;
use crate::query::{distance_between, DistanceResponse};
use crate::sqlite_store::SqliteStore;

/// Longest accepted `postcode` parameter, space included.
pub const MAX_POSTCODE_LEN: usize = 8;
/// Accepted radius range in meters. Fractional values are allowed.
pub const RADIUS_RANGE: std::ops::RangeInclusive<f64> = 1.0..=50_000.0;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn PostcodeStore>,
    lookups: Arc<TtlCache<Option<PostcodeView>>>,
    radii: Arc<TtlCache<Vec<PostcodeWithDistance>>>,
    distances: Arc<TtlCache<Option<DistanceResponse>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn PostcodeStore>, cache: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(cache.ttl_secs);
        Self {
            store,
            lookups: Arc::new(TtlCache::new(ttl, cache.max_entries)),
            radii: Arc::new(TtlCache::new(ttl, cache.max_entries)),
            distances: Arc::new(TtlCache::new(ttl, cache.max_entries)),
        }
    }
}

/// Build the router with all routes and CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/postcode/lookup", get(handle_lookup))
        .route("/postcode/radius", get(handle_radius))
        .route("/postcode/distance", get(handle_distance))
        .layer(cors)
        .with_state(state)
}

/// Starts the query service backed by the configured SQLite database.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn PostcodeStore> = Arc::new(SqliteStore::new(pool));
    let app = router(AppState::new(store, &config.cache));

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "query service listening");
    println!("Postcode service listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Envelope ============

#[derive(Serialize)]
struct Success<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "query failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "Internal server error".to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

// ============ Validation ============

fn require_postcode<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, AppError> {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(bad_request(format!("{} is required", name)));
    }
    if value.chars().count() > MAX_POSTCODE_LEN {
        return Err(bad_request(format!(
            "{} must be at most {} characters",
            name, MAX_POSTCODE_LEN
        )));
    }
    Ok(value)
}

fn parse_radius(value: Option<&str>) -> Result<f64, AppError> {
    let message = || {
        bad_request(format!(
            "radius must be a number between {} and {}",
            RADIUS_RANGE.start(),
            RADIUS_RANGE.end()
        ))
    };
    let radius: f64 = value
        .map(str::trim)
        .ok_or_else(message)?
        .parse()
        .map_err(|_| message())?;
    // NaN fails `contains`; infinities fall outside the range.
    if !RADIUS_RANGE.contains(&radius) {
        return Err(message());
    }
    Ok(radius)
}

fn radius_cache_key(raw: &str, radius: f64) -> String {
    format!("postcode_radius_{}_{}", cache_code(raw), radius)
}

/// Cache key component: the canonical code when `raw` normalizes, otherwise
/// the trimmed upper-cased input.
fn cache_code(raw: &str) -> String {
    normalize(raw)
        .map(|p| p.canonical)
        .unwrap_or_else(|| raw.trim().to_uppercase())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /postcode/lookup ============

#[derive(Debug, Deserialize)]
struct LookupParams {
    postcode: Option<String>,
}

async fn handle_lookup(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<Success<PostcodeView>>, AppError> {
    let raw = require_postcode("postcode", params.postcode.as_deref())?;
    let key = format!("postcode_lookup_{}", cache_code(raw));

    let found = state
        .lookups
        .get_or_try_insert_with(key, state.store.lookup(raw))
        .await?;

    found
        .map(ok)
        .ok_or_else(|| not_found("Postcode not found"))
}

// ============ GET /postcode/radius ============

#[derive(Debug, Deserialize)]
struct RadiusParams {
    postcode: Option<String>,
    radius: Option<String>,
}

async fn handle_radius(
    State(state): State<AppState>,
    Query(params): Query<RadiusParams>,
) -> Result<Json<Success<Vec<PostcodeWithDistance>>>, AppError> {
    let raw = require_postcode("postcode", params.postcode.as_deref())?;
    let radius = parse_radius(params.radius.as_deref())?;
    let key = radius_cache_key(raw, radius);

    let hits = state
        .radii
        .get_or_try_insert_with(key, state.store.radius_search(raw, radius))
        .await?;

    Ok(ok(hits))
}

// ============ GET /postcode/distance ============

#[derive(Debug, Deserialize)]
struct DistanceParams {
    from: Option<String>,
    to: Option<String>,
}

async fn handle_distance(
    State(state): State<AppState>,
    Query(params): Query<DistanceParams>,
) -> Result<Json<Success<DistanceResponse>>, AppError> {
    let from = require_postcode("from", params.from.as_deref())?;
    let to = require_postcode("to", params.to.as_deref())?;
    let key = format!("postcode_distance_{}_{}", cache_code(from), cache_code(to));

    state
        .distances
        .get_or_try_insert_with(key, distance_between(state.store.as_ref(), from, to))
        .await?
        .map(ok)
        .ok_or_else(|| not_found("One or both postcodes not found"))
}
