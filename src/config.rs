use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::cache::ttl::PathPattern;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    jpeg,
    webp,
    avif,
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::jpeg => write!(f, "jpeg"),
            ImageFormat::webp => write!(f, "webp"),
            ImageFormat::avif => write!(f, "avif"),
        }
    }
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::webp => "image/webp",
            ImageFormat::jpeg => "image/jpeg",
            ImageFormat::avif => "image/avif",
        }
    }
}

pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=86400";
pub const NO_CACHE_CONTROL: &str = "no-store";

/// Core module: secrets, size limits, allowed/default formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreModule {
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_max_input_size")]
    pub max_input_size: usize,
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<ImageFormat>,
    #[serde(default)]
    pub default_format: Option<ImageFormat>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub debug_query_param: String,
}

fn default_max_input_size() -> usize {
    8 * 1024 * 1024
}
fn default_allowed_formats() -> Vec<ImageFormat> {
    vec![ImageFormat::jpeg, ImageFormat::webp, ImageFormat::avif]
}

impl Default for CoreModule {
    fn default() -> Self {
        Self {
            secret: String::new(),
            max_input_size: default_max_input_size(),
            allowed_formats: default_allowed_formats(),
            default_format: Some(ImageFormat::webp),
            environment: "development".into(),
            debug_query_param: "debug".into(),
        }
    }
}

/// Storage module: priority ordering, retry policy, circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageModule {
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,
    #[serde(default)]
    pub cache_dir: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    #[serde(default)]
    pub remote_base_url: Option<String>,
    #[serde(default)]
    pub fallback_base_url: Option<String>,
}

fn default_priority() -> Vec<String> {
    vec!["r2".into(), "remote".into(), "fallback".into()]
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    2000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_failure_window_secs() -> u64 {
    60
}
fn default_failure_rate_threshold() -> f64 {
    0.5
}

impl Default for StorageModule {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            cache_dir: PathBuf::from("./cache"),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            failure_window_secs: default_failure_window_secs(),
            failure_rate_threshold: default_failure_rate_threshold(),
            remote_base_url: None,
            fallback_base_url: None,
        }
    }
}

/// Transform module: performance budgets driving Client Detection optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceBudget {
    #[serde(default = "default_preferred_formats")]
    pub preferred_formats: HashMap<String, Vec<ImageFormat>>,
    #[serde(default = "default_quality_ranges")]
    pub quality: HashMap<String, (u8, u8)>,
    #[serde(default = "default_max_dimensions")]
    pub max_dimensions: HashMap<String, u32>,
}

fn default_preferred_formats() -> HashMap<String, Vec<ImageFormat>> {
    let mut m = HashMap::new();
    m.insert(
        "slow".into(),
        vec![ImageFormat::avif, ImageFormat::webp, ImageFormat::jpeg],
    );
    m.insert(
        "medium".into(),
        vec![ImageFormat::webp, ImageFormat::avif, ImageFormat::jpeg],
    );
    m.insert(
        "fast".into(),
        vec![ImageFormat::avif, ImageFormat::webp, ImageFormat::jpeg],
    );
    m
}

fn default_quality_ranges() -> HashMap<String, (u8, u8)> {
    let mut m = HashMap::new();
    m.insert("slow".into(), (40, 65));
    m.insert("medium".into(), (60, 80));
    m.insert("fast".into(), (75, 95));
    m
}

fn default_max_dimensions() -> HashMap<String, u32> {
    let mut m = HashMap::new();
    m.insert("slow".into(), 800);
    m.insert("medium".into(), 1600);
    m.insert("fast".into(), 3200);
    m
}

impl Default for PerformanceBudget {
    fn default() -> Self {
        Self {
            preferred_formats: default_preferred_formats(),
            quality: default_quality_ranges(),
            max_dimensions: default_max_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransformModule {
    #[serde(default)]
    pub performance_budget: PerformanceBudget,
    #[serde(default)]
    pub derivatives: HashMap<String, BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub client_hint_cache_size: Option<usize>,
}

/// Cache module: variant cache knobs, HTTP cache bypass rules, TTL patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmutableContent {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub derivatives: Vec<String>,
}

impl Default for ImmutableContent {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            content_types: Vec::new(),
            derivatives: Vec::new(),
        }
    }
}

/// A predicate over path/format/content-type/host/query, evaluated against
/// one request; matching rules contribute `tag` to the Cache Tags Manager's
/// output alongside the deterministic tag families. All configured
/// predicate fields must match (`None` fields are ignored); `path` and
/// `content_type` are regexes, the rest are exact matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalTagRule {
    pub tag: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub query_param: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheModule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_variant_prefix")]
    pub prefix: String,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default)]
    pub disallowed_paths: Vec<String>,
    #[serde(default = "default_true")]
    pub optimized_indexing: bool,
    #[serde(default = "default_small_purge_threshold")]
    pub small_purge_threshold: usize,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_small_file_threshold")]
    pub small_file_threshold: u64,
    #[serde(default)]
    pub skip_indices_for_small_files: bool,
    #[serde(default = "default_min_ttl")]
    pub min_ttl: u32,
    #[serde(default = "default_max_ttl")]
    pub max_ttl: u32,
    #[serde(default)]
    pub path_patterns: Vec<PathPattern>,
    #[serde(default)]
    pub conditional_tags: Vec<ConditionalTagRule>,
    #[serde(default)]
    pub immutable_content: ImmutableContent,
    #[serde(default)]
    pub bypass_params: Vec<String>,
    #[serde(default)]
    pub bypass_paths: Vec<String>,
    #[serde(default)]
    pub bypass_formats: Vec<ImageFormat>,
    #[serde(default = "default_true")]
    pub bypass_in_development: bool,
    #[serde(default = "default_true")]
    pub bypass_for_admin: bool,
    #[serde(default = "default_client_hints")]
    pub vary_client_hints: Vec<String>,
    #[serde(default)]
    pub cache_api: bool,
}

fn default_true() -> bool {
    true
}
fn default_variant_prefix() -> String {
    "edgeimg".into()
}
fn default_max_size() -> u64 {
    20 * 1024 * 1024
}
fn default_small_purge_threshold() -> usize {
    500
}
fn default_maintenance_interval_secs() -> u64 {
    300
}
fn default_small_file_threshold() -> u64 {
    1024
}
fn default_min_ttl() -> u32 {
    60
}
fn default_max_ttl() -> u32 {
    31_536_000
}
fn default_client_hints() -> Vec<String> {
    vec![
        "DPR".into(),
        "Viewport-Width".into(),
        "Width".into(),
        "Save-Data".into(),
    ]
}

impl Default for CacheModule {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_variant_prefix(),
            max_size: default_max_size(),
            disallowed_paths: Vec::new(),
            optimized_indexing: true,
            small_purge_threshold: default_small_purge_threshold(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            small_file_threshold: default_small_file_threshold(),
            skip_indices_for_small_files: false,
            min_ttl: default_min_ttl(),
            max_ttl: default_max_ttl(),
            path_patterns: Vec::new(),
            conditional_tags: Vec::new(),
            immutable_content: ImmutableContent::default(),
            bypass_params: vec!["nocache".into(), "refresh".into(), "force-refresh".into()],
            bypass_paths: Vec::new(),
            bypass_formats: Vec::new(),
            bypass_in_development: true,
            bypass_for_admin: true,
            vary_client_hints: default_client_hints(),
            cache_api: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigMeta {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub active_modules: Vec<String>,
    #[serde(default)]
    pub last_updated: String,
}

/// The full, hot-reloadable configuration document: one JSON object with
/// four modules plus a `_meta` block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigDocument {
    #[serde(rename = "_meta", default)]
    pub meta: ConfigMeta,
    #[serde(default)]
    pub core: CoreModule,
    #[serde(default)]
    pub storage: StorageModule,
    #[serde(default)]
    pub transform: TransformModule,
    #[serde(default)]
    pub cache: CacheModule,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("secret cannot be empty")]
    EmptySecret,
    #[error("max input size must be > 0")]
    InvalidMaxInput,
    #[error("invalid path pattern {0}: {1}")]
    InvalidPattern(String, String),
}

impl ConfigDocument {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core.secret.trim().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.core.max_input_size == 0 {
            return Err(ConfigError::InvalidMaxInput);
        }
        for p in &self.cache.path_patterns {
            Regex::new(&p.matcher)
                .map_err(|e| ConfigError::InvalidPattern(p.name.clone(), e.to_string()))?;
        }
        Ok(())
    }
}

/// Derived lookups computed once per config load rather than per request.
pub struct DerivedLookups {
    pub compiled_patterns: Vec<(PathPattern, Regex)>,
    pub bypass_path_set: Vec<String>,
    pub disallowed_path_set: Vec<String>,
}

impl DerivedLookups {
    fn build(doc: &ConfigDocument) -> Self {
        let mut compiled_patterns: Vec<(PathPattern, Regex)> = doc
            .cache
            .path_patterns
            .iter()
            .filter_map(|p| Regex::new(&p.matcher).ok().map(|re| (p.clone(), re)))
            .collect();
        // Highest priority first; ties keep first-listed order (stable sort).
        compiled_patterns.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));
        Self {
            compiled_patterns,
            bypass_path_set: doc.cache.bypass_paths.clone(),
            disallowed_path_set: doc.cache.disallowed_paths.clone(),
        }
    }
}

/// Typed accessor over the hot-reloadable config document.
pub struct ConfigService {
    inner: RwLock<Arc<(ConfigDocument, Arc<DerivedLookups>)>>,
}

impl ConfigService {
    pub fn new(doc: ConfigDocument) -> Self {
        let derived = Arc::new(DerivedLookups::build(&doc));
        Self {
            inner: RwLock::new(Arc::new((doc, derived))),
        }
    }

    pub async fn current(&self) -> Arc<(ConfigDocument, Arc<DerivedLookups>)> {
        self.inner.read().await.clone()
    }

    pub async fn document(&self) -> ConfigDocument {
        self.inner.read().await.0.clone()
    }

    pub async fn derived(&self) -> Arc<DerivedLookups> {
        self.inner.read().await.1.clone()
    }

    /// Hot-reload: recompute derived lookups and swap the document atomically.
    pub async fn reload(&self, doc: ConfigDocument) -> Result<(), ConfigError> {
        doc.validate()?;
        let derived = Arc::new(DerivedLookups::build(&doc));
        let mut guard = self.inner.write().await;
        *guard = Arc::new((doc, derived));
        Ok(())
    }
}

/// Legacy flat configuration retained for the original `/img` handler and
/// existing tests; now a thin view constructed from `ConfigDocument`.
#[derive(Debug, Clone)]
pub struct ImageKitConfig {
    pub secret: String,
    pub cache_dir: PathBuf,
    pub max_input_size: usize,
    pub allowed_formats: Vec<ImageFormat>,
    pub default_format: Option<ImageFormat>,
    pub max_cache_size: Option<u64>,
}

impl Default for ImageKitConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            cache_dir: PathBuf::from("./cache"),
            max_input_size: 8 * 1024 * 1024,
            allowed_formats: vec![ImageFormat::jpeg, ImageFormat::webp, ImageFormat::avif],
            default_format: Some(ImageFormat::webp),
            max_cache_size: None,
        }
    }
}

impl From<&ConfigDocument> for ImageKitConfig {
    fn from(doc: &ConfigDocument) -> Self {
        Self {
            secret: doc.core.secret.clone(),
            cache_dir: doc.storage.cache_dir.clone(),
            max_input_size: doc.core.max_input_size,
            allowed_formats: doc.core.allowed_formats.clone(),
            default_format: doc.core.default_format,
            max_cache_size: Some(doc.cache.max_size),
        }
    }
}

impl ImageKitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.trim().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.max_input_size == 0 {
            return Err(ConfigError::InvalidMaxInput);
        }
        Ok(())
    }
}
