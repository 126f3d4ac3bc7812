//! HTTP Cache Orchestrator: generalizes a static Cache-Control header config
//! into per-request bypass decisions, TTL-driven headers, and
//! stale-while-revalidate scheduling.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};

use crate::cache::ttl::TtlCalculator;
use crate::scheduler::{BackgroundScheduler, BoxFuture};

#[derive(Debug, Clone, Default)]
pub struct BypassConfig {
    pub bypass_params: Vec<String>,
    pub bypass_paths: Vec<String>,
    pub bypass_formats: Vec<String>,
    pub bypass_in_development: bool,
    pub bypass_for_admin: bool,
    pub environment: String,
    pub admin_headers: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheRequestContext {
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub cache_control: Option<String>,
    pub format: Option<String>,
    pub debug: bool,
}

/// Evaluates the configured bypass rules top to bottom; the first matching
/// rule wins.
pub fn should_bypass(ctx: &CacheRequestContext, config: &BypassConfig, headers: &HeaderMap) -> bool {
    if let Some(cc) = &ctx.cache_control {
        if cc.contains("no-cache") || cc.contains("no-store") {
            return true;
        }
    }
    if config.bypass_params.iter().any(|p| ctx.query.contains_key(p)) {
        return true;
    }
    if config.bypass_paths.iter().any(|p| ctx.path.starts_with(p.as_str())) {
        return true;
    }
    if config.environment == "development" && config.bypass_in_development {
        return true;
    }
    if config.bypass_for_admin && config.admin_headers.iter().any(|h| headers.contains_key(h.as_str())) {
        return true;
    }
    if let Some(fmt) = &ctx.format {
        if config.bypass_formats.iter().any(|f| f == fmt) {
            return true;
        }
    }
    if ctx.debug {
        return true;
    }
    if matches!(ctx.query.get("debug").map(String::as_str), Some("true") | Some("html")) {
        return true;
    }
    false
}

#[derive(Debug, Clone)]
pub struct CacheHeaders {
    pub cache_control: String,
    pub cdn_cache_control: String,
    pub cache_tag: Option<String>,
    pub vary: &'static str,
    pub stale_while_revalidate: Option<u32>,
    /// The TTL (seconds) this header set was computed from, so callers that
    /// need the numeric value (variant-cache metadata) don't recompute it.
    pub ttl: u64,
}

/// Builds response headers for a TTL computed by `TtlCalculator`, driven by
/// a per-request TTL instead of a single static config.
pub fn build_headers(ttl: u64, tags: &[String], immutable: bool, stale_while_revalidate: Option<u32>) -> CacheHeaders {
    if ttl == 0 {
        return CacheHeaders {
            cache_control: "no-store, no-cache, must-revalidate".to_string(),
            cdn_cache_control: "no-store".to_string(),
            cache_tag: None,
            vary: "Accept-Encoding",
            stale_while_revalidate: None,
            ttl: 0,
        };
    }

    let mut parts = vec!["public".to_string(), format!("max-age={ttl}"), format!("s-maxage={ttl}")];
    if immutable {
        parts.push("immutable".to_string());
    }
    if let Some(swr) = stale_while_revalidate {
        parts.push(format!("stale-while-revalidate={swr}"));
    }

    CacheHeaders {
        cache_control: parts.join(", "),
        cdn_cache_control: format!("max-age={ttl}"),
        cache_tag: if tags.is_empty() { None } else { Some(tags.join(",")) },
        vary: "Accept-Encoding",
        stale_while_revalidate,
        ttl,
    }
}

impl CacheHeaders {
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Ok(v) = HeaderValue::from_str(&self.cache_control) {
            headers.insert(header::CACHE_CONTROL, v);
        }
        if let Ok(v) = HeaderValue::from_str(&self.cdn_cache_control) {
            headers.insert(header::HeaderName::from_static("cdn-cache-control"), v);
        }
        if let Some(tag) = &self.cache_tag {
            if let Ok(v) = HeaderValue::from_str(tag) {
                headers.insert(header::HeaderName::from_static("cache-tag"), v);
            }
        }
        headers.insert(header::VARY, HeaderValue::from_static(self.vary));
    }
}

/// Orchestrates TTL calculation, bypass evaluation, and background
/// stale-while-revalidate scheduling for one response.
pub struct HttpCacheOrchestrator {
    ttl_calculator: Arc<TtlCalculator>,
    bypass: BypassConfig,
    immutable_default: bool,
    stale_while_revalidate: Option<u32>,
}

impl HttpCacheOrchestrator {
    pub fn new(
        ttl_calculator: Arc<TtlCalculator>,
        bypass: BypassConfig,
        immutable_default: bool,
        stale_while_revalidate: Option<u32>,
    ) -> Self {
        Self { ttl_calculator, bypass, immutable_default, stale_while_revalidate }
    }

    pub fn should_bypass(&self, ctx: &CacheRequestContext, headers: &HeaderMap) -> bool {
        should_bypass(ctx, &self.bypass, headers)
    }

    pub fn headers_for(&self, ctx: &CacheRequestContext, status: u16, content_type: &str, derivative: Option<&str>, tags: &[String]) -> CacheHeaders {
        let ttl = self.ttl_calculator.calculate(&ctx.path, status, content_type, derivative);
        build_headers(ttl, tags, self.immutable_default, self.stale_while_revalidate)
    }

    /// Applies headers to `response_headers`, and when the entry is stale
    /// relative to `age_seconds` but within the stale-while-revalidate
    /// window, schedules `revalidate` as background work instead of
    /// blocking the response.
    pub fn cache_with_fallback(
        &self,
        ctx: &CacheRequestContext,
        status: u16,
        content_type: &str,
        derivative: Option<&str>,
        tags: &[String],
        response_headers: &mut HeaderMap,
        age_seconds: Option<u64>,
        scheduler: Option<&Arc<dyn BackgroundScheduler>>,
        revalidate: Option<BoxFuture>,
    ) -> CacheHeaders {
        let headers = self.headers_for(ctx, status, content_type, derivative, tags);
        headers.apply(response_headers);

        if let (Some(age), Some(swr), Some(sched), Some(fut)) =
            (age_seconds, headers.stale_while_revalidate, scheduler, revalidate)
        {
            let ttl = self.ttl_calculator.calculate(&ctx.path, status, content_type, derivative);
            if age >= ttl && age < ttl + swr as u64 {
                sched.wait_until(fut);
            }
        }

        headers
    }
}

/// Applies a fixed TTL unconditionally on 2xx responses, for routes that
/// want a flat Cache-Control rather than the full orchestrator (static
/// assets served from `frontend/`).
pub async fn fixed_ttl_cache_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(req).await;
    if response.status().is_success() {
        let headers = build_headers(86400, &[], false, Some(60));
        headers.apply(response.headers_mut());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx(path: &str) -> CacheRequestContext {
        CacheRequestContext { path: path.to_string(), query: BTreeMap::new(), cache_control: None, format: None, debug: false }
    }

    #[test]
    fn bypass_params_triggers_bypass() {
        let mut c = ctx("/img/cat.jpg");
        c.query.insert("no-cache".to_string(), "1".to_string());
        let config = BypassConfig { bypass_params: vec!["no-cache".to_string()], ..Default::default() };
        assert!(should_bypass(&c, &config, &HeaderMap::new()));
    }

    #[test]
    fn admin_header_triggers_bypass_when_enabled() {
        let c = ctx("/img/cat.jpg");
        let config = BypassConfig {
            bypass_for_admin: true,
            admin_headers: vec!["x-admin".to_string()],
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-admin", HeaderValue::from_static("1"));
        assert!(should_bypass(&c, &config, &headers));
    }

    #[test]
    fn clean_request_is_not_bypassed() {
        let c = ctx("/img/cat.jpg");
        let config = BypassConfig::default();
        assert!(!should_bypass(&c, &config, &HeaderMap::new()));
    }

    #[test]
    fn zero_ttl_produces_no_store_headers() {
        let headers = build_headers(0, &[], false, None);
        assert_eq!(headers.cache_control, "no-store, no-cache, must-revalidate");
    }

    #[test]
    fn nonzero_ttl_includes_tags_and_swr() {
        let headers = build_headers(3600, &["edgeimg-type-image".to_string()], true, Some(60));
        assert!(headers.cache_control.contains("max-age=3600"));
        assert!(headers.cache_control.contains("immutable"));
        assert!(headers.cache_control.contains("stale-while-revalidate=60"));
        assert_eq!(headers.cache_tag.as_deref(), Some("edgeimg-type-image"));
    }
}
