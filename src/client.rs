//! Client Detection Service: resolves `ClientInfo` from request headers
//! using strategies ordered by confidence, with a bounded
//! per-request-fingerprint cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::config::{ImageFormat, PerformanceBudget};
use crate::params::TransformOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkQuality {
    Slow,
    Medium,
    Fast,
}

impl NetworkQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkQuality::Slow => "slow",
            NetworkQuality::Medium => "medium",
            NetworkQuality::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClassification {
    LowEnd,
    MidRange,
    HighEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub device_type: DeviceType,
    pub viewport_width: Option<u32>,
    pub device_pixel_ratio: f64,
    pub save_data: bool,
    pub accepts_webp: bool,
    pub accepts_avif: bool,
    pub network_quality: NetworkQuality,
    pub device_classification: DeviceClassification,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Desktop,
            viewport_width: None,
            device_pixel_ratio: 1.0,
            save_data: false,
            accepts_webp: false,
            accepts_avif: false,
            network_quality: NetworkQuality::Medium,
            device_classification: DeviceClassification::MidRange,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

/// Client-hints strategy: `Sec-CH-Viewport-Width`, `Sec-CH-DPR`,
/// `Sec-CH-Prefers-Reduced-Data` / `Save-Data`.
fn from_client_hints(headers: &HeaderMap, info: &mut ClientInfo) {
    if let Some(w) = header_f64(headers, "sec-ch-viewport-width").or_else(|| header_f64(headers, "viewport-width")) {
        info.viewport_width = Some(w.max(0.0) as u32);
    }
    if let Some(dpr) = header_f64(headers, "sec-ch-dpr").or_else(|| header_f64(headers, "dpr")) {
        info.device_pixel_ratio = dpr;
    }
    if header_str(headers, "save-data") == Some("on") {
        info.save_data = true;
    }
    if let Some(width) = info.viewport_width {
        info.device_type = classify_device_type(width);
    }
}

/// Accept-header strategy: format support, inferred from the `Accept` header.
fn from_accept_header(headers: &HeaderMap, info: &mut ClientInfo) {
    if let Some(accept) = header_str(headers, "accept") {
        info.accepts_webp = accept.contains("image/webp") || accept.contains("*/*");
        info.accepts_avif = accept.contains("image/avif");
    }
}

/// User-agent strategy: coarse device-type fallback when client hints were
/// absent.
fn from_user_agent(headers: &HeaderMap, info: &mut ClientInfo, have_viewport: bool) {
    if have_viewport {
        return;
    }
    if let Some(ua) = header_str(headers, "user-agent") {
        let ua_lower = ua.to_lowercase();
        info.device_type = if ua_lower.contains("mobile") {
            DeviceType::Mobile
        } else if ua_lower.contains("tablet") || ua_lower.contains("ipad") {
            DeviceType::Tablet
        } else {
            DeviceType::Desktop
        };
    }
}

fn classify_device_type(viewport_width: u32) -> DeviceType {
    if viewport_width < 600 {
        DeviceType::Mobile
    } else if viewport_width < 1024 {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    }
}

/// `networkQuality(request)`: derives from `Downlink`/`RTT` headers or
/// `Save-Data`.
pub fn network_quality(headers: &HeaderMap) -> NetworkQuality {
    if header_str(headers, "save-data") == Some("on") {
        return NetworkQuality::Slow;
    }
    let downlink = header_f64(headers, "downlink");
    let rtt = header_f64(headers, "rtt");
    match (downlink, rtt) {
        (Some(d), _) if d < 0.7 => NetworkQuality::Slow,
        (_, Some(r)) if r > 600.0 => NetworkQuality::Slow,
        (Some(d), _) if d < 2.0 => NetworkQuality::Medium,
        (_, Some(r)) if r > 150.0 => NetworkQuality::Medium,
        (Some(_), _) | (_, Some(_)) => NetworkQuality::Fast,
        _ => NetworkQuality::Medium,
    }
}

/// `deviceClassification(request)`: thresholds viewport×DPR and the
/// `Save-Data` flag.
pub fn device_classification(info: &ClientInfo) -> DeviceClassification {
    if info.save_data {
        return DeviceClassification::LowEnd;
    }
    let effective_width = info.viewport_width.unwrap_or(360) as f64 * info.device_pixel_ratio;
    if effective_width >= 1600.0 {
        DeviceClassification::HighEnd
    } else if effective_width >= 700.0 {
        DeviceClassification::MidRange
    } else {
        DeviceClassification::LowEnd
    }
}

/// `supportsFormat(request, fmt)`.
pub fn supports_format(info: &ClientInfo, fmt: ImageFormat) -> bool {
    match fmt {
        ImageFormat::avif => info.accepts_avif,
        ImageFormat::webp => info.accepts_webp,
        ImageFormat::jpeg => true,
    }
}

fn fingerprint(headers: &HeaderMap) -> u64 {
    const RELEVANT: &[&str] = &[
        "accept",
        "user-agent",
        "sec-ch-viewport-width",
        "viewport-width",
        "sec-ch-dpr",
        "dpr",
        "save-data",
        "downlink",
        "rtt",
    ];
    let mut hasher = DefaultHasher::new();
    for name in RELEVANT {
        if let Some(v) = header_str(headers, name) {
            name.hash(&mut hasher);
            v.hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// Bounded LRU cache of resolved `ClientInfo`, keyed by a header fingerprint.
pub struct ClientInfoCache {
    capacity: usize,
    inner: Mutex<(HashMap<u64, ClientInfo>, VecDeque<u64>)>,
}

impl ClientInfoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new((HashMap::new(), VecDeque::new())),
        }
    }

    fn get(&self, key: u64) -> Option<ClientInfo> {
        let mut guard = self.inner.lock().unwrap();
        let hit = guard.0.get(&key).cloned();
        if hit.is_some() {
            guard.1.retain(|k| *k != key);
            guard.1.push_back(key);
        }
        hit
    }

    fn put(&self, key: u64, value: ClientInfo) {
        let mut guard = self.inner.lock().unwrap();
        if !guard.0.contains_key(&key) && guard.0.len() >= self.capacity {
            if let Some(oldest) = guard.1.pop_front() {
                guard.0.remove(&oldest);
            }
        }
        guard.1.retain(|k| *k != key);
        guard.1.push_back(key);
        guard.0.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().0.len()
    }
}

impl Default for ClientInfoCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Resolves `ClientInfo`, consulting `cache` first. Strategies are applied
/// in confidence order: client-hints > accept-header > user-agent > defaults.
pub fn resolve(headers: &HeaderMap, cache: &ClientInfoCache) -> ClientInfo {
    let key = fingerprint(headers);
    if let Some(hit) = cache.get(key) {
        return hit;
    }

    let mut info = ClientInfo::default();
    let had_viewport_hint = header_str(headers, "sec-ch-viewport-width")
        .or_else(|| header_str(headers, "viewport-width"))
        .is_some();
    from_client_hints(headers, &mut info);
    from_accept_header(headers, &mut info);
    from_user_agent(headers, &mut info, had_viewport_hint);
    info.network_quality = network_quality(headers);
    info.device_classification = device_classification(&info);

    cache.put(key, info.clone());
    info
}

/// `getOptimizedOptions(request, base, config)`.
pub fn get_optimized_options(
    info: &ClientInfo,
    base: &TransformOptions,
    budget: &PerformanceBudget,
) -> TransformOptions {
    let mut opts = base.clone();
    let nq = info.network_quality.as_str();

    if opts.format.is_none() {
        let preferred = budget
            .preferred_formats
            .get(nq)
            .cloned()
            .unwrap_or_else(|| vec![ImageFormat::avif, ImageFormat::webp, ImageFormat::jpeg]);
        opts.format = preferred
            .into_iter()
            .find(|fmt| supports_format(info, *fmt))
            .map(|fmt| fmt.content_type().trim_start_matches("image/").to_string());
    }

    if let Some((lo, hi)) = budget.quality.get(nq).copied() {
        let mut q = opts.quality.unwrap_or(hi);
        if info.save_data {
            q = q.saturating_sub((hi.saturating_sub(lo)) / 2).max(lo);
        }
        opts.quality = Some(q.clamp(lo, hi));
    }

    if let Some(max_dim) = budget.max_dimensions.get(nq).copied() {
        if let Some(w) = opts.width {
            opts.width = Some(w.min(max_dim));
        }
        if let Some(h) = opts.height {
            opts.height = Some(h.min(max_dim));
        }
    }

    opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn accept_header_detects_webp_and_avif() {
        let h = headers(&[("accept", "image/avif,image/webp,*/*")]);
        let cache = ClientInfoCache::new(4);
        let info = resolve(&h, &cache);
        assert!(info.accepts_avif);
        assert!(info.accepts_webp);
    }

    #[test]
    fn save_data_forces_slow_network_and_low_end() {
        let h = headers(&[("save-data", "on")]);
        let cache = ClientInfoCache::new(4);
        let info = resolve(&h, &cache);
        assert_eq!(info.network_quality, NetworkQuality::Slow);
        assert_eq!(info.device_classification, DeviceClassification::LowEnd);
    }

    #[test]
    fn cache_hits_avoid_recompute_and_evict_lru() {
        let cache = ClientInfoCache::new(1);
        let a = headers(&[("user-agent", "a")]);
        let b = headers(&[("user-agent", "b")]);
        resolve(&a, &cache);
        assert_eq!(cache.len(), 1);
        resolve(&b, &cache);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(fingerprint(&a)).is_none());
    }

    #[test]
    fn optimized_options_pick_supported_format_and_clamp_dimensions() {
        let info = ClientInfo {
            accepts_avif: false,
            accepts_webp: true,
            network_quality: NetworkQuality::Slow,
            ..ClientInfo::default()
        };
        let mut budget = PerformanceBudget::default();
        budget
            .preferred_formats
            .insert("slow".into(), vec![ImageFormat::avif, ImageFormat::webp, ImageFormat::jpeg]);
        budget.max_dimensions.insert("slow".into(), 800);
        let base = TransformOptions {
            width: Some(2000),
            ..TransformOptions::default()
        };
        let opts = get_optimized_options(&info, &base, &budget);
        assert_eq!(opts.format, Some("webp".to_string()));
        assert_eq!(opts.width, Some(800));
    }
}
