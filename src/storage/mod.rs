//! Storage Service: ordered multi-source fetch with retry, per-source
//! circuit breaker, and adaptive priority reordering.

pub mod backend;
pub mod priority;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::resilience::{retry_with_backoff, CircuitBreaker, RetryError, RetryPolicy};

pub use backend::{FallbackSource, R2Source, RemoteSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    R2,
    Remote,
    Fallback,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::R2 => "r2",
            SourceType::Remote => "remote",
            SourceType::Fallback => "fallback",
        }
    }
}

/// `StorageResult`. Invariant: `content_type` is never empty (defaults to
/// `application/octet-stream`).
#[derive(Debug, Clone)]
pub struct StorageResult {
    pub body: Vec<u8>,
    pub source_type: SourceType,
    pub content_type: String,
    pub size: usize,
    pub path: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub metadata: HashMap<String, String>,
}

impl StorageResult {
    pub fn new(body: Vec<u8>, source_type: SourceType, content_type: impl Into<String>, path: impl Into<String>) -> Self {
        let content_type = {
            let ct = content_type.into();
            if ct.is_empty() {
                "application/octet-stream".to_string()
            } else {
                ct
            }
        };
        let size = body.len();
        Self {
            body,
            source_type,
            content_type,
            size,
            path: path.into(),
            width: None,
            height: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum StorageError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request")]
    BadRequest,
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("server error: {0}")]
    Server(String),
}

impl StorageError {
    /// Network errors, 5xx, and timeouts are retryable; 404/403/400 are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Timeout | StorageError::Network(_) | StorageError::Server(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AllStorageSourcesFailed {
    #[error("all storage sources failed: {0:?}")]
    Errors(Vec<(String, StorageError)>),
    #[error("not found in any storage source")]
    NotFound,
}

#[async_trait]
pub trait StorageSource: Send + Sync {
    fn source_type(&self) -> SourceType;
    async fn fetch(&self, path: &str) -> Result<StorageResult, StorageError>;
}

struct SourceEntry {
    name: String,
    source: Arc<dyn StorageSource>,
    breaker: CircuitBreaker,
}

/// Reads an image from the first working source in priority order,
/// maintaining per-source circuit breakers and a sliding-window failure log
/// used to compute an effective (adaptively-reordered) priority.
pub struct StorageService {
    sources: HashMap<String, SourceEntry>,
    failure_log: priority::FailureLog,
    retry_policy: RetryPolicy,
    failure_rate_threshold: f64,
}

impl StorageService {
    pub fn new(
        sources: Vec<(String, Arc<dyn StorageSource>)>,
        failure_threshold: u32,
        success_threshold: u32,
        reset_timeout: Duration,
        failure_window: Duration,
        failure_rate_threshold: f64,
        retry_policy: RetryPolicy,
    ) -> Self {
        let mut map = HashMap::new();
        for (name, source) in sources {
            map.insert(
                name.clone(),
                SourceEntry {
                    name,
                    source,
                    breaker: CircuitBreaker::new(failure_threshold, success_threshold, reset_timeout),
                },
            );
        }
        Self {
            sources: map,
            failure_log: priority::FailureLog::new(failure_window),
            retry_policy,
            failure_rate_threshold,
        }
    }

    pub async fn fetch(&self, path: &str, configured_priority: &[String]) -> Result<StorageResult, AllStorageSourcesFailed> {
        let order = self.failure_log.effective_priority(configured_priority, self.failure_rate_threshold);

        let mut errors = Vec::new();
        let mut all_not_found = true;

        for name in order {
            let Some(entry) = self.sources.get(&name) else {
                continue;
            };
            if !entry.breaker.allow_request() {
                continue;
            }

            let result = retry_with_backoff(
                self.retry_policy.clone(),
                || entry.source.fetch(path),
                |e: &StorageError| e.is_retryable(),
            )
            .await;

            match result {
                Ok((storage_result, _attempts)) => {
                    entry.breaker.record_success();
                    self.failure_log.clear(&name);
                    return Ok(storage_result);
                }
                Err(RetryError::NonRetryable(e)) | Err(RetryError::Exhausted(e)) => {
                    entry.breaker.record_failure();
                    self.failure_log.record_failure(&name);
                    if !matches!(e, StorageError::NotFound) {
                        all_not_found = false;
                    }
                    errors.push((name, e));
                }
            }
        }

        if !errors.is_empty() && all_not_found {
            return Err(AllStorageSourcesFailed::NotFound);
        }
        Err(AllStorageSourcesFailed::Errors(errors))
    }
}
