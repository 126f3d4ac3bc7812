use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
    body::Body,
    Json,
};
use axum::extract::Multipart;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;
use tower_http::services::ServeDir;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tokio_util::sync::CancellationToken;

pub mod client;
pub mod command;
pub mod config;
pub mod lifecycle;
pub mod params;
pub mod path;
pub mod resilience;
pub mod scheduler;
pub mod signature;
pub mod cache;
pub mod storage;
pub mod transform;
pub mod fetch;
#[cfg(feature = "prometheus")]
pub mod metrics;

use crate::cache::http_cache::{BypassConfig, CacheRequestContext, HttpCacheOrchestrator};
use crate::cache::ttl::TtlCalculator;
use crate::cache::variant::VariantCache;
use crate::cache::{Cache, DiskCache};
use crate::client::ClientInfoCache;
use crate::command::{CommandError, CommandRequest, TransformCommand};
use crate::config::{ConfigDocument, ImageFormat, ImageKitConfig, DEFAULT_QUALITY, DEFAULT_CACHE_CONTROL, NO_CACHE_CONTROL};
use crate::fetch::fetch_source;
use crate::params::{akamai, compact, native};
use crate::resilience::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::signature::verify_signature;
use crate::storage::backend::{FallbackSource, R2Source, RemoteSource};
use crate::storage::{StorageService, StorageSource};
use crate::transform::service::TransformationService;
use crate::transform::{encode_image, resize_image, decode_image};

#[derive(Error, Debug)]
pub enum ImageKitError {
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Transformation error: {0}")]
    TransformError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Expired: {0}")]
    Expired(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ImageKitError>;

/// Public query parameters for the legacy (flat, `url=`-based) transform route.
#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub url: String,
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub h: Option<u32>,
    #[serde(default)]
    pub f: Option<ImageFormat>,
    #[serde(default)]
    pub q: Option<u8>,
    #[serde(default)]
    pub t: Option<i64>,
    pub sig: String,
}

#[derive(Debug, Deserialize)]
pub struct SignQuery {
    pub url: String,
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub h: Option<u32>,
    #[serde(default)]
    pub f: Option<ImageFormat>,
    #[serde(default)]
    pub q: Option<u8>,
    #[serde(default)]
    pub t: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub canonical: String,
    pub sig: String,
    pub signed_url: String,
}

fn canonical_params(query_map: &BTreeMap<String, String>) -> String {
    let mut parts = Vec::new();
    for (k, v) in query_map {
        if k != "sig" { parts.push(format!("{}={}", k, v)); }
    }
    parts.join("&")
}

async fn handler(
    Query(query): Query<ImageQuery>,
    state: axum::extract::State<Arc<ImageKitConfig>>,
) -> impl IntoResponse {
    tracing::debug!("Processing image request: url={}, w={:?}, h={:?}, f={:?}, q={:?}",
                    query.url, query.w, query.h, query.f, query.q);

    let mut map = BTreeMap::new();
    map.insert("url".into(), query.url.clone());
    if let Some(w) = query.w { map.insert("w".into(), w.to_string()); }
    if let Some(h) = query.h { map.insert("h".into(), h.to_string()); }
    if let Some(f) = query.f { map.insert("f".into(), f.to_string()); }
    if let Some(q) = query.q { map.insert("q".into(), q.to_string()); }
    if let Some(t) = query.t { map.insert("t".into(), t.to_string()); }

    if let Err(e) = verify_signature(&map, &query.sig, &state.secret) {
        tracing::warn!("Signature verification failed for url={}: {:?}", query.url, e);
        let status = match e {
            crate::signature::SignatureError::Expired => StatusCode::GONE,
            _ => StatusCode::UNAUTHORIZED,
        };
        return (status, e.to_string()).into_response();
    }

    if let Some(q) = query.q {
        if q == 0 || q > 100 { return (StatusCode::BAD_REQUEST, "Invalid quality").into_response(); }
    }

    let cache = DiskCache::new(state.cache_dir.clone());
    let canonical_params = canonical_params(&map);
    let key = cache.key_for(&map);

    if let Some(data) = cache.get(&key).await.map_err(|e| e.to_string()).ok().flatten() {
        tracing::info!("Cache hit for key={}", key);
        METRICS.cache_hits.fetch_add(1, Ordering::Relaxed);

        let etag = cache.etag_for(&key);
        let format = query.f.unwrap_or_else(|| state.default_format.unwrap_or(ImageFormat::webp));
        let content_type = format.content_type();

        let mut headers = HeaderMap::new();
        headers.insert("Cache-Control", HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
        headers.insert("ETag", HeaderValue::from_str(&etag).unwrap_or(HeaderValue::from_static("")));
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        return (headers, Body::from(data)).into_response();
    }

    tracing::info!("Cache miss for key={}, fetching from {}", key, query.url);
    METRICS.cache_misses.fetch_add(1, Ordering::Relaxed);
    METRICS.transforms.fetch_add(1, Ordering::Relaxed);
    let max_size = state.max_input_size;
    let allowed = state.allowed_formats.clone();
    let (bytes, _content_type) = match fetch_source(&query.url, max_size, &allowed).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to fetch {}: {}", query.url, e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let (img, _orig_format) = match decode_image(&bytes) {
        Ok(d) => d,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Decode error: {}", e)).into_response(),
    };

    let resized = match resize_image(img, query.w, query.h) {
        Ok(i) => i,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Resize error: {}", e)).into_response(),
    };

    let target_format = query.f.unwrap_or_else(|| state.default_format.unwrap_or(ImageFormat::webp));
    let quality = query.q.unwrap_or(DEFAULT_QUALITY);

    let encoded = match encode_image(&resized, target_format, quality) {
        Ok(b) => b,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Encode error: {}", e)).into_response(),
    };

    if let Err(e) = cache.put(&key, &encoded, target_format, &canonical_params).await {
        tracing::warn!("Failed to cache transformed image: {}", e);
    }

    let etag = cache.etag_for(&key);
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
    headers.insert("ETag", HeaderValue::from_str(&etag).unwrap_or(HeaderValue::from_static("")));
    headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static(target_format.content_type()));
    (headers, Body::from(encoded)).into_response()
}

async fn sign_handler(
    Query(query): Query<SignQuery>,
    state: axum::extract::State<Arc<ImageKitConfig>>,
) -> Json<SignResponse> {
    let mut map = BTreeMap::new();
    map.insert("url".into(), query.url.clone());
    if let Some(w) = query.w { map.insert("w".into(), w.to_string()); }
    if let Some(h) = query.h { map.insert("h".into(), h.to_string()); }
    if let Some(f) = query.f { map.insert("f".into(), f.to_string()); }
    if let Some(q) = query.q { map.insert("q".into(), q.to_string()); }
    if let Some(t) = query.t { map.insert("t".into(), t.to_string()); }

    let canonical = canonical_params(&map);
    let mut mac = Hmac::<Sha256>::new_from_slice(state.secret.as_bytes()).expect("HMAC key");
    mac.update(canonical.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());

    let mut signed_url = String::from("/img?");
    signed_url.push_str(&canonical);
    signed_url.push_str("&sig=");
    signed_url.push_str(&sig);

    Json(SignResponse { canonical, sig, signed_url })
}

/// Provide an Axum route handler for the legacy flat image transform route.
/// Usage: `app.route("/img", edgeimg::route(config))`
pub fn route(config: ImageKitConfig) -> axum::routing::MethodRouter {
    let state = Arc::new(config);
    get(handler).with_state(state)
}

async fn upload_handler(
    axum::extract::State(state): axum::extract::State<Arc<ImageKitConfig>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut w: Option<u32> = None;
    let mut h: Option<u32> = None;
    let mut f: Option<ImageFormat> = None;
    let mut q: Option<u8> = None;

    while let Some(field) = match multipart.next_field().await {
        Ok(opt) => opt,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid multipart").into_response(),
    } {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            match field.bytes().await {
                Ok(bytes) => file_bytes = Some(bytes.to_vec()),
                Err(_) => return (StatusCode::BAD_REQUEST, "Invalid file").into_response(),
            }
        } else if name == "w" {
            if let Ok(text) = field.text().await { w = text.parse::<u32>().ok(); }
        } else if name == "h" {
            if let Ok(text) = field.text().await { h = text.parse::<u32>().ok(); }
        } else if name == "f" {
            if let Ok(text) = field.text().await {
                f = match text.as_str() { "jpeg" => Some(ImageFormat::jpeg), "webp" => Some(ImageFormat::webp), "avif" => Some(ImageFormat::avif), _ => None };
            }
        } else if name == "q" {
            if let Ok(text) = field.text().await { q = text.parse::<u8>().ok(); }
        }
    }

    let bytes = match file_bytes { Some(b) => b, None => return (StatusCode::BAD_REQUEST, "Missing file").into_response() };
    let (img, _orig_format) = match decode_image(&bytes) {
        Ok(d) => d,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Decode error: {}", e)).into_response(),
    };

    let resized = match resize_image(img, w, h) {
        Ok(i) => i,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Resize error: {}", e)).into_response(),
    };

    let target_format = f.unwrap_or_else(|| state.default_format.unwrap_or(ImageFormat::webp));
    let quality = q.unwrap_or(DEFAULT_QUALITY);

    let encoded = match encode_image(&resized, target_format, quality) {
        Ok(b) => b,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Encode error: {}", e)).into_response(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static(target_format.content_type()));
    headers.insert("Cache-Control", HeaderValue::from_static(NO_CACHE_CONTROL));
    (headers, Body::from(encoded)).into_response()
}

// ====================================================================================
// OBSERVABILITY
// ====================================================================================

use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub transforms: AtomicU64,
    pub errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            transforms: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

lazy_static::lazy_static! {
    static ref METRICS: Metrics = Metrics::new();
}

async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "edgeimg"
    }))
}

async fn cache_stats_handler(
    axum::extract::State(state): axum::extract::State<Arc<ImageKitConfig>>,
) -> impl IntoResponse {
    use crate::cache::SledCache;

    match SledCache::new(&state.cache_dir, state.max_cache_size) {
        Ok(cache) => {
            let stats = cache.stats().await;

            let hits = METRICS.cache_hits.load(Ordering::Relaxed);
            let misses = METRICS.cache_misses.load(Ordering::Relaxed);
            let total_requests = hits + misses;
            let hit_rate = if total_requests > 0 {
                (hits as f64 / total_requests as f64) * 100.0
            } else {
                0.0
            };

            use serde_json::json;
            Json(json!({
                "cache": {
                    "total_size_bytes": stats.total_size_bytes,
                    "total_size_mb": stats.total_size_bytes as f64 / 1024.0 / 1024.0,
                    "entry_count": stats.entry_count,
                    "max_size_bytes": stats.max_size_bytes,
                    "max_size_mb": stats.max_size_bytes as f64 / 1024.0 / 1024.0,
                    "usage_percent": (stats.total_size_bytes as f64 / stats.max_size_bytes as f64) * 100.0,
                },
                "requests": {
                    "cache_hits": hits,
                    "cache_misses": misses,
                    "total": total_requests,
                    "hit_rate_percent": hit_rate,
                },
                "transforms": {
                    "total": METRICS.transforms.load(Ordering::Relaxed),
                    "errors": METRICS.errors.load(Ordering::Relaxed),
                }
            })).into_response()
        },
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Cache error: {}", e)).into_response()
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let hits = METRICS.cache_hits.load(Ordering::Relaxed);
    let misses = METRICS.cache_misses.load(Ordering::Relaxed);
    let transforms = METRICS.transforms.load(Ordering::Relaxed);
    let errors = METRICS.errors.load(Ordering::Relaxed);

    let metrics = format!(
        "# HELP edgeimg_cache_hits_total Total number of cache hits\n\
         # TYPE edgeimg_cache_hits_total counter\n\
         edgeimg_cache_hits_total {}\n\
         # HELP edgeimg_cache_misses_total Total number of cache misses\n\
         # TYPE edgeimg_cache_misses_total counter\n\
         edgeimg_cache_misses_total {}\n\
         # HELP edgeimg_transforms_total Total number of image transformations\n\
         # TYPE edgeimg_transforms_total counter\n\
         edgeimg_transforms_total {}\n\
         # HELP edgeimg_errors_total Total number of errors\n\
         # TYPE edgeimg_errors_total counter\n\
         edgeimg_errors_total {}\n",
        hits, misses, transforms, errors
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics
    )
}

// ====================================================================================
// COMPOSITION ROOT
// ====================================================================================

/// Everything the unified `/img/*path` handler needs, built once at startup
/// from a `ConfigDocument` and shared across requests behind `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub command: Arc<TransformCommand>,
    pub known_derivatives: Arc<Vec<String>>,
    pub debug_query_param: Arc<str>,
}

/// Builds the full service graph described by `doc`: storage sources behind
/// a `StorageService`, the transform/variant-cache/HTTP-cache trio, and the
/// `TransformCommand` orchestrator that composes them.
pub fn build_app_state(doc: &ConfigDocument, derived: &config::DerivedLookups) -> std::result::Result<AppState, Box<dyn std::error::Error>> {
    let mut sources: Vec<(String, Arc<dyn StorageSource>)> = Vec::new();
    sources.push(("r2".to_string(), Arc::new(R2Source::open(&doc.storage.cache_dir)?)));
    if let Some(base) = &doc.storage.remote_base_url {
        sources.push(("remote".to_string(), Arc::new(RemoteSource::new(base.clone(), doc.core.secret.clone()))));
    }
    if let Some(base) = &doc.storage.fallback_base_url {
        sources.push(("fallback".to_string(), Arc::new(FallbackSource::new(base.clone()))));
    }

    let storage = Arc::new(StorageService::new(
        sources,
        doc.storage.failure_threshold,
        doc.storage.success_threshold,
        Duration::from_millis(doc.storage.reset_timeout_ms),
        Duration::from_secs(doc.storage.failure_window_secs),
        doc.storage.failure_rate_threshold,
        RetryPolicy {
            max_attempts: doc.storage.max_attempts,
            initial_delay_ms: doc.storage.initial_delay_ms,
            max_delay_ms: doc.storage.max_delay_ms,
        },
    ));

    let transformer = Arc::new(TransformationService::with_default_metadata());

    let variant_db_path = doc.storage.cache_dir.join("variants");
    let variant_db = sled::open(&variant_db_path)?;
    let variant_cache = Arc::new(VariantCache::new(
        variant_db,
        doc.cache.enabled,
        doc.cache.max_size,
        doc.cache.optimized_indexing,
        doc.cache.small_purge_threshold,
        doc.cache.small_file_threshold as usize,
        doc.cache.skip_indices_for_small_files,
        Duration::from_secs(doc.cache.maintenance_interval_secs),
        doc.cache.disallowed_paths.clone(),
    ));

    let mut derivative_overrides = BTreeMap::new();
    for (name, fields) in &doc.transform.derivatives {
        if let Some(ttl) = fields.get("ttl").and_then(|v| v.as_u64()) {
            derivative_overrides.insert(name.clone(), ttl);
        }
    }
    let ttl_calculator = Arc::new(TtlCalculator::new(
        derived.compiled_patterns.clone(),
        derivative_overrides,
        doc.cache.immutable_content.paths.clone(),
        doc.cache.immutable_content.content_types.clone(),
        doc.cache.immutable_content.derivatives.clone(),
        doc.cache.min_ttl as u64,
        doc.cache.max_ttl as u64,
    ));
    let bypass = BypassConfig {
        bypass_params: doc.cache.bypass_params.clone(),
        bypass_paths: derived.bypass_path_set.clone(),
        bypass_formats: doc.cache.bypass_formats.iter().map(|f| f.to_string()).collect(),
        bypass_in_development: doc.cache.bypass_in_development,
        bypass_for_admin: doc.cache.bypass_for_admin,
        environment: doc.core.environment.clone(),
        admin_headers: vec!["x-admin-token".to_string()],
    };
    let http_cache = Arc::new(HttpCacheOrchestrator::new(ttl_calculator, bypass, false, Some(60)));

    let client_cache = Arc::new(ClientInfoCache::new(doc.transform.client_hint_cache_size.unwrap_or(1024)));
    let scheduler: Option<Arc<dyn crate::scheduler::BackgroundScheduler>> = Some(Arc::new(Scheduler::new(8)));

    let command = Arc::new(TransformCommand {
        storage,
        storage_priority: Arc::new(doc.storage.priority.clone()),
        transformer,
        variant_cache,
        http_cache,
        client_cache,
        performance_budget: Arc::new(doc.transform.performance_budget.clone()),
        scheduler,
        cache_tag_prefix: Arc::from(doc.cache.prefix.as_str()),
        conditional_tag_rules: Arc::new(doc.cache.conditional_tags.clone()),
    });

    let known_derivatives: Vec<String> = doc.transform.derivatives.keys().cloned().collect();

    Ok(AppState {
        command,
        known_derivatives: Arc::new(known_derivatives),
        debug_query_param: Arc::from(doc.core.debug_query_param.as_str()),
    })
}

fn command_error_status(e: &CommandError) -> StatusCode {
    match e {
        CommandError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        CommandError::Storage(_) => StatusCode::NOT_FOUND,
        CommandError::Transform(_) => StatusCode::BAD_REQUEST,
    }
}

/// Unified `/img/*path` handler: parses the path and query across all three
/// dialects, merges them, and delegates to the `TransformCommand`.
async fn transform_handler(
    State(state): State<AppState>,
    axum::extract::Path(raw_path): axum::extract::Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let normalized = path::normalize(&format!("/{raw_path}"));
    let (without_inline, inline_options) = path::parse_image_path(&normalized);
    let (cleaned_path, derivative) = path::extract_derivative(&without_inline, &state.known_derivatives);

    let mut merged_query = query.clone();
    for (k, v) in inline_options {
        merged_query.entry(k).or_insert(v);
    }

    let mut params = native::parse(&merged_query);
    if compact::can_parse(&merged_query) {
        params.extend(compact::parse(&merged_query));
    }
    if akamai::can_parse(&merged_query) {
        params.extend(akamai::parse(&merged_query));
    }

    let mut options = params::merge(params);
    options.path = Some(cleaned_path.clone());
    if options.derivative.is_none() {
        options.derivative = derivative;
    }

    let debug = merged_query.get(state.debug_query_param.as_ref()).is_some();
    let debug_html = matches!(merged_query.get("debug").map(String::as_str), Some("html"));

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let request = CommandRequest {
        path: cleaned_path,
        host,
        query: merged_query,
        headers,
        options,
        cancellation: CancellationToken::new(),
        debug,
        debug_html,
    };

    match state.command.execute(request).await {
        Ok(response) => {
            let mut http_headers = response.headers;
            if let Some(report) = response.debug_report {
                http_headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
                return (StatusCode::OK, http_headers, Body::from(report)).into_response();
            }
            http_headers.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_str(&response.content_type).unwrap_or(HeaderValue::from_static("application/octet-stream")),
            );
            (StatusCode::OK, http_headers, Body::from(response.body)).into_response()
        }
        Err(e) => {
            METRICS.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "transform command failed");
            (command_error_status(&e), e.to_string()).into_response()
        }
    }
}

/// Builds the full router from a config document: the unified transform
/// route plus the legacy flat route, observability endpoints, and static
/// asset serving.
pub fn build_router(doc: ConfigDocument, derived: Arc<config::DerivedLookups>) -> std::result::Result<Router, Box<dyn std::error::Error>> {
    let app_state = build_app_state(&doc, &derived)?;
    let legacy_config = Arc::new(ImageKitConfig::from(&doc));

    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler).with_state(legacy_config.clone()))
        .route("/metrics", get(metrics_handler));

    let mut transform_routes = Router::new()
        .route("/img/*path", get(transform_handler).with_state(app_state))
        .route("/legacy/img", get(handler).with_state(legacy_config.clone()))
        .route("/upload", axum::routing::post(upload_handler).with_state(legacy_config.clone()))
        .route("/sign", get(sign_handler).with_state(legacy_config.clone()));

    if std::env::var("DISABLE_RATE_LIMIT").is_err() {
        let governor_conf = Box::new(
            GovernorConfigBuilder::default()
                .per_second(10)
                .burst_size(30)
                .finish()
                .unwrap()
        );

        tracing::info!("Router configured with rate limiting: 10/sec, burst 30");

        transform_routes = transform_routes.layer(GovernorLayer {
            config: Box::leak(governor_conf),
        });
    } else {
        tracing::info!("Rate limiting disabled");
    }

    Ok(Router::new()
        .merge(observability_routes)
        .merge(transform_routes)
        .nest_service("/", ServeDir::new("frontend")))
}

/// Legacy entry point retained for callers that only want the flat
/// `url=`-based route wired up (no storage/variant-cache/client-detection
/// graph).
pub fn router(config: ImageKitConfig) -> Router {
    let state = Arc::new(config);

    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler).with_state(state.clone()))
        .route("/metrics", get(metrics_handler));

    let mut transform_routes = Router::new()
        .route("/img", get(handler).with_state(state.clone()))
        .route("/upload", axum::routing::post(upload_handler).with_state(state.clone()))
        .route("/sign", get(sign_handler).with_state(state.clone()));

    if std::env::var("DISABLE_RATE_LIMIT").is_err() {
        let governor_conf = Box::new(
            GovernorConfigBuilder::default()
                .per_second(10)
                .burst_size(30)
                .finish()
                .unwrap()
        );

        transform_routes = transform_routes.layer(GovernorLayer {
            config: Box::leak(governor_conf),
        });
    }

    Router::new()
        .merge(observability_routes)
        .merge(transform_routes)
        .nest_service("/", ServeDir::new("frontend"))
}
