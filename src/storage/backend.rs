//! Concrete `StorageSource` backends: an R2-shaped local KV store, a signed
//! remote HTTP source, and a plain-HTTP fallback.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;

use super::{SourceType, StorageError, StorageResult, StorageSource};

/// Stand-in for an R2 bucket backed by a local `sled` tree, keyed by the
/// normalized request path.
pub struct R2Source {
    db: sled::Db,
}

impl R2Source {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        Ok(Self { db: sled::open(path)? })
    }

    /// Seeds (or overwrites) an object, used by tests and the `/upload` route.
    pub fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), sled::Error> {
        self.db.insert(format!("body:{path}"), bytes)?;
        self.db.insert(format!("ct:{path}"), content_type.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl StorageSource for R2Source {
    fn source_type(&self) -> SourceType {
        SourceType::R2
    }

    async fn fetch(&self, path: &str) -> Result<StorageResult, StorageError> {
        let body = self
            .db
            .get(format!("body:{path}"))
            .map_err(|e| StorageError::Network(e.to_string()))?
            .ok_or(StorageError::NotFound)?;
        let content_type = self
            .db
            .get(format!("ct:{path}"))
            .map_err(|e| StorageError::Network(e.to_string()))?
            .and_then(|v| String::from_utf8(v.to_vec()).ok())
            .unwrap_or_default();
        Ok(StorageResult::new(body.to_vec(), SourceType::R2, content_type, path))
    }
}

/// Origin reached via HTTP GET with an HMAC-signed `X-Signature` header.
pub struct RemoteSource {
    client: Client,
    base_url: String,
    secret: String,
}

impl RemoteSource {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            secret: secret.into(),
        }
    }

    fn sign(&self, path: &str) -> Option<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(path.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl StorageSource for RemoteSource {
    fn source_type(&self) -> SourceType {
        SourceType::Remote
    }

    async fn fetch(&self, path: &str) -> Result<StorageResult, StorageError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut req = self.client.get(&url);
        if let Some(sig) = self.sign(path) {
            req = req.header("X-Signature", sig);
        }
        let resp = req.send().await.map_err(classify_reqwest_error)?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound);
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(StorageError::Forbidden);
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(StorageError::BadRequest);
        }
        if status.is_server_error() {
            return Err(StorageError::Server(status.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::Network(format!("unexpected status {status}")));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = collect_body(resp).await?;
        Ok(StorageResult::new(bytes, SourceType::Remote, content_type, path))
    }
}

/// Unsigned origin fetch, the last resort after R2 and the signed remote.
pub struct FallbackSource {
    client: Client,
    base_url: String,
}

impl FallbackSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StorageSource for FallbackSource {
    fn source_type(&self) -> SourceType {
        SourceType::Fallback
    }

    async fn fetch(&self, path: &str) -> Result<StorageResult, StorageError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let resp = self.client.get(&url).send().await.map_err(classify_reqwest_error)?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound);
        }
        if !status.is_success() {
            return Err(StorageError::Network(format!("unexpected status {status}")));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = collect_body(resp).await?;
        Ok(StorageResult::new(bytes, SourceType::Fallback, content_type, path))
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> StorageError {
    if e.is_timeout() {
        StorageError::Timeout
    } else {
        StorageError::Network(e.to_string())
    }
}

async fn collect_body(resp: reqwest::Response) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await.transpose().map_err(classify_reqwest_error)? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn r2_source_roundtrips_through_sled() {
        let dir = tempfile_dir();
        let source = R2Source::open(&dir).unwrap();
        source.put("/cat.jpg", b"bytes", "image/jpeg").unwrap();
        let result = source.fetch("/cat.jpg").await.unwrap();
        assert_eq!(result.body, b"bytes");
        assert_eq!(result.content_type, "image/jpeg");
        assert_eq!(result.source_type, SourceType::R2);
    }

    #[tokio::test]
    async fn r2_source_reports_not_found() {
        let dir = tempfile_dir();
        let source = R2Source::open(&dir).unwrap();
        let err = source.fetch("/missing.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("edgeimg-r2-test-{}", std::process::id()));
        dir.push(uuid_like());
        dir
    }

    /// Avoids pulling in a `uuid` dependency for a one-off test directory name.
    fn uuid_like() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        format!("{}", SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos())
    }
}
