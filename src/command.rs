//! Transform Command: one instance of orchestration per request, composing
//! the Storage, Transformation, and HTTP Cache services through a fixed
//! sequence of steps.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::http_cache::{CacheRequestContext, HttpCacheOrchestrator};
use crate::cache::tags::{self, TagRequestInfo};
use crate::cache::variant::{CacheEntryMetadata, VariantCache};
use crate::client::{self, ClientInfo, ClientInfoCache};
use crate::config::{ConditionalTagRule, PerformanceBudget};
use crate::params::TransformOptions;
use crate::scheduler::BackgroundScheduler;
use crate::storage::{AllStorageSourcesFailed, StorageService};
use crate::transform::service::{TransformationError, TransformationService};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("request cancelled")]
    Cancelled,
    #[error("storage: {0}")]
    Storage(String),
    #[error("transform: {0}")]
    Transform(#[from] TransformationError),
}

pub struct CommandRequest {
    pub path: String,
    pub host: String,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub options: TransformOptions,
    pub cancellation: CancellationToken,
    pub debug: bool,
    pub debug_html: bool,
}

pub struct CommandResponse {
    pub body: Vec<u8>,
    pub content_type: String,
    pub headers: HeaderMap,
    pub debug_report: Option<String>,
}

/// Collaborators a `TransformCommand` needs for one request. Held as `Arc`s
/// so a scheduled background write (step 7) can own a 'static clone rather
/// than borrowing from the request's stack frame.
#[derive(Clone)]
pub struct TransformCommand {
    pub storage: Arc<StorageService>,
    pub storage_priority: Arc<Vec<String>>,
    pub transformer: Arc<TransformationService>,
    pub variant_cache: Arc<VariantCache>,
    pub http_cache: Arc<HttpCacheOrchestrator>,
    pub client_cache: Arc<ClientInfoCache>,
    pub performance_budget: Arc<PerformanceBudget>,
    pub scheduler: Option<Arc<dyn BackgroundScheduler>>,
    pub cache_tag_prefix: Arc<str>,
    pub conditional_tag_rules: Arc<Vec<ConditionalTagRule>>,
}

impl TransformCommand {
    pub async fn execute(&self, mut req: CommandRequest) -> Result<CommandResponse, CommandError> {
        let command_started = Instant::now();

        // Step 1: honor cancellation up front.
        if req.cancellation.is_cancelled() {
            return Err(CommandError::Cancelled);
        }

        // Step 2: fetch source bytes.
        let storage_started = Instant::now();
        let storage_result = self
            .storage
            .fetch(&req.path, &self.storage_priority)
            .await
            .map_err(describe_storage_failure)?;
        debug!(path = %req.path, duration_ms = storage_started.elapsed().as_millis() as u64, "storage fetch complete");

        if req.cancellation.is_cancelled() {
            return Err(CommandError::Cancelled);
        }

        // Step 3: client-aware optimization folds into `req.options` before
        // transform, ahead of the smart-crop metadata lookup inside the
        // Transformation Service itself.
        let client_info = if req.debug {
            Some(client::resolve(&req.headers, &self.client_cache))
        } else if req.options.smart {
            Some(client::resolve(&req.headers, &self.client_cache))
        } else {
            None
        };
        if let Some(info) = &client_info {
            req.options = client::get_optimized_options(info, &req.options, &self.performance_budget);
        }

        // Step 4: transform.
        let transform_started = Instant::now();
        let (encoded, format) = match self.transformer.transform(&req.path, &storage_result.body, &req.options).await {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %req.path, error = %e, "transform failed");
                return Err(CommandError::Transform(e));
            }
        };
        let transform_ms = transform_started.elapsed().as_millis() as u64;
        info!(path = %req.path, duration_ms = transform_ms, format = %format, "transform complete");

        // Step 5: cache headers via the HTTP Cache Orchestrator.
        let cache_ctx = CacheRequestContext {
            path: req.path.clone(),
            query: req.query.clone(),
            cache_control: req.headers.get(axum::http::header::CACHE_CONTROL).and_then(|v| v.to_str().ok()).map(str::to_string),
            format: req.options.format.clone(),
            debug: req.debug,
        };
        let tag_request = TagRequestInfo { path: req.path.clone(), host: req.host.clone(), query: req.query.clone() };
        let tags = tags::build_tags(&self.cache_tag_prefix, &tag_request, &storage_result, &req.options, &self.conditional_tag_rules).unwrap_or_default();

        let content_type = format.content_type().to_string();
        let mut response_headers = HeaderMap::new();
        let bypassed = self.http_cache.should_bypass(&cache_ctx, &req.headers);

        let ttl = if !bypassed {
            // Step 8 folded in here: `cache_with_fallback` both applies
            // headers and (conditionally) schedules SWR revalidation.
            let headers = self.http_cache.cache_with_fallback(
                &cache_ctx,
                200,
                &content_type,
                req.options.derivative.as_deref(),
                &tags,
                &mut response_headers,
                None,
                self.scheduler.as_ref(),
                None,
            );
            headers.ttl
        } else {
            self.http_cache.headers_for(&cache_ctx, 200, &content_type, req.options.derivative.as_deref(), &tags).ttl
        };

        // Step 6: debug headers, only computed when requested.
        if req.debug {
            if let Some(info) = &client_info {
                attach_debug_headers(&mut response_headers, info);
            }
        }

        // Step 7: schedule (or perform inline) the variant cache write.
        let metadata = CacheEntryMetadata {
            url: req.path.clone(),
            timestamp: 0,
            content_type: content_type.clone(),
            size: encoded.len(),
            transform_options: req.options.canonical_json(),
            tags: tags.clone(),
            ttl,
            expiration: 0,
            original_size: storage_result.size,
        };
        let fingerprint = variant_cache_key(&req.path, &req.options);

        match &self.scheduler {
            Some(sched) => {
                let sched = sched.clone();
                let variant_cache = self.variant_cache.clone();
                let path_for_write = req.path.clone();
                let body_for_write = encoded.clone();
                sched.wait_until(Box::pin(async move {
                    if let Err(e) = variant_cache.put(&fingerprint, &path_for_write, &body_for_write, metadata, None) {
                        warn!(error = %e, "background variant cache write failed");
                    }
                }));
            }
            None => {
                if let Err(e) = self.variant_cache.put(&fingerprint, &req.path, &encoded, metadata, None) {
                    warn!(error = %e, "inline variant cache write failed");
                }
            }
        }

        // Step 9: debug HTML report branch.
        let debug_report = if req.debug_html {
            Some(render_debug_report(&req, &storage_result.source_type, transform_ms, command_started.elapsed().as_millis() as u64))
        } else {
            None
        };

        info!(path = %req.path, duration_ms = command_started.elapsed().as_millis() as u64, "command complete");

        Ok(CommandResponse { body: encoded, content_type, headers: response_headers, debug_report })
    }
}

fn describe_storage_failure(e: AllStorageSourcesFailed) -> CommandError {
    match e {
        AllStorageSourcesFailed::NotFound => CommandError::Storage("not found".to_string()),
        AllStorageSourcesFailed::Errors(errs) => {
            CommandError::Storage(errs.into_iter().map(|(n, e)| format!("{n}: {e}")).collect::<Vec<_>>().join("; "))
        }
    }
}

fn variant_cache_key(path: &str, options: &TransformOptions) -> String {
    use sha2::{Digest, Sha256};
    let canonical = options.canonical_json();
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn attach_debug_headers(headers: &mut HeaderMap, info: &ClientInfo) {
    if let Ok(v) = axum::http::HeaderValue::from_str(&format!("{:?}", info.device_type)) {
        headers.insert(axum::http::HeaderName::from_static("x-debug-device-type"), v);
    }
    if let Ok(v) = axum::http::HeaderValue::from_str(info.network_quality.as_str()) {
        headers.insert(axum::http::HeaderName::from_static("x-debug-network-quality"), v);
    }
    if let Ok(v) = axum::http::HeaderValue::from_str(&format!("{:?}", info.device_classification)) {
        headers.insert(axum::http::HeaderName::from_static("x-debug-device-class"), v);
    }
}

fn render_debug_report(req: &CommandRequest, source: &crate::storage::SourceType, transform_ms: u64, total_ms: u64) -> String {
    format!(
        "<html><body><h1>Transform debug report</h1><ul>\
         <li>path: {}</li><li>origin: {}</li><li>transform_ms: {}</li><li>total_ms: {}</li>\
         <li>options: {}</li></ul></body></html>",
        req.path,
        source.as_str(),
        transform_ms,
        total_ms,
        req.options.canonical_json(),
    )
}

