//! Transform Variant Cache: KV-backed store for fully transformed
//! responses, generalized from `sled_cache.rs` with tag/path secondary
//! indices and background-eligible maintenance.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sled::Db;

use crate::scheduler::BackgroundScheduler;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub url: String,
    pub timestamp: u64,
    pub content_type: String,
    pub size: usize,
    pub transform_options: serde_json::Value,
    pub tags: Vec<String>,
    pub ttl: u64,
    pub expiration: u64,
    pub original_size: usize,
}

impl CacheEntryMetadata {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[derive(Debug, Default, Clone)]
pub struct VariantCacheStats {
    pub count: usize,
    pub size: u64,
    pub hits: u64,
    pub misses: u64,
    pub index_size: usize,
    pub optimized: bool,
    pub last_pruned: Option<u64>,
}

impl VariantCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn avg_size(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.size as f64 / self.count as f64
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VariantCacheError {
    #[error("entry exceeds max cache size")]
    TooLarge,
    #[error("path is disallowed for caching")]
    DisallowedPath,
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for VariantCacheError {
    fn from(e: sled::Error) -> Self {
        VariantCacheError::Backend(e.to_string())
    }
}

pub struct VariantCache {
    db: Db,
    enabled: bool,
    max_size: u64,
    optimized_indexing: bool,
    small_purge_threshold: usize,
    small_file_threshold: usize,
    skip_indices_for_small_files: bool,
    maintenance_interval: Duration,
    disallowed_paths: Vec<String>,
    hits: AtomicU64,
    misses: AtomicU64,
    last_pruned: std::sync::Mutex<Option<u64>>,
}

impl VariantCache {
    pub fn new(
        db: Db,
        enabled: bool,
        max_size: u64,
        optimized_indexing: bool,
        small_purge_threshold: usize,
        small_file_threshold: usize,
        skip_indices_for_small_files: bool,
        maintenance_interval: Duration,
        disallowed_paths: Vec<String>,
    ) -> Self {
        Self {
            db,
            enabled,
            max_size,
            optimized_indexing,
            small_purge_threshold,
            small_file_threshold,
            skip_indices_for_small_files,
            maintenance_interval,
            disallowed_paths,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_pruned: std::sync::Mutex::new(None),
        }
    }

    fn is_disallowed(&self, path: &str) -> bool {
        self.disallowed_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    fn meta_key(key: &str) -> String {
        format!("meta:{key}")
    }
    fn body_key(key: &str) -> String {
        format!("body:{key}")
    }

    fn read_meta(&self, key: &str) -> Option<CacheEntryMetadata> {
        self.db
            .get(Self::meta_key(key))
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    pub fn is_cached(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.read_meta(key).map(|m| !m.is_expired(now_unix())).unwrap_or(false)
    }

    pub fn get(&self, key: &str, path: &str) -> Option<(Vec<u8>, CacheEntryMetadata)> {
        if !self.enabled || self.is_disallowed(path) {
            return None;
        }
        let Some(meta) = self.read_meta(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if meta.is_expired(now_unix()) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let Ok(Some(body)) = self.db.get(Self::body_key(key)) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some((body.to_vec(), meta))
    }

    /// `put`; when `scheduler` is provided, index/stat updates are
    /// scheduled as background work rather than performed inline.
    pub fn put(
        &self,
        key: &str,
        path: &str,
        body: &[u8],
        mut metadata: CacheEntryMetadata,
        scheduler: Option<&Arc<dyn BackgroundScheduler>>,
    ) -> Result<(), VariantCacheError> {
        if !self.enabled {
            return Ok(());
        }
        if self.is_disallowed(path) {
            return Err(VariantCacheError::DisallowedPath);
        }
        if body.len() as u64 > self.max_size {
            return Err(VariantCacheError::TooLarge);
        }

        metadata.size = body.len();
        metadata.timestamp = now_unix();
        metadata.expiration = metadata.timestamp + metadata.ttl;

        self.db.insert(Self::body_key(key), body)?;
        self.db.insert(Self::meta_key(key), serde_json::to_vec(&metadata).unwrap())?;

        let skip_indices = self.skip_indices_for_small_files && body.len() < self.small_file_threshold;
        if skip_indices {
            return Ok(());
        }

        let key_owned = key.to_string();
        let path_owned = path.to_string();
        let tags = metadata.tags.clone();
        let db = self.db.clone();
        let optimized = self.optimized_indexing;
        let update = move || {
            index_add(&db, optimized, &tags, &path_owned, &key_owned);
        };

        match scheduler {
            Some(s) => s.wait_until(Box::pin(async move { update() })),
            None => update(),
        }
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), VariantCacheError> {
        let Some(meta) = self.read_meta(key) else {
            return Ok(());
        };
        self.db.remove(Self::meta_key(key))?;
        self.db.remove(Self::body_key(key))?;
        // path index key is recovered from metadata.url, used verbatim as
        // the indexed path by convention (see `index_add`).
        index_remove(&self.db, self.optimized_indexing, &meta.tags, &meta.url, key);
        Ok(())
    }

    /// Enumerates and deletes every key under `tag`. Uses a list+filter
    /// scan above `small_purge_threshold` to avoid large single reads.
    pub fn purge_by_tag(&self, tag: &str, scheduler: Option<&Arc<dyn BackgroundScheduler>>) -> usize {
        let keys = index_read_tag(&self.db, self.optimized_indexing, tag);
        let count = keys.len();
        if count == 0 {
            return 0;
        }

        index_clear_tag(&self.db, self.optimized_indexing, tag);

        let db = self.db.clone();
        let optimized = self.optimized_indexing;
        let deletion = move || {
            for key in keys {
                if let Some(meta) = db
                    .get(format!("meta:{key}"))
                    .ok()
                    .flatten()
                    .and_then(|b| serde_json::from_slice::<CacheEntryMetadata>(&b).ok())
                {
                    let _ = db.remove(format!("meta:{key}"));
                    let _ = db.remove(format!("body:{key}"));
                    index_remove(&db, optimized, &meta.tags, &meta.url, &key);
                }
            }
        };

        if count > self.small_purge_threshold {
            if let Some(s) = scheduler {
                s.wait_until(Box::pin(async move { deletion() }));
                return count;
            }
        }
        deletion();
        count
    }

    /// `*` is a single-segment wildcard over `/`-separated path segments.
    pub fn purge_by_path(&self, glob_pattern: &str, scheduler: Option<&Arc<dyn BackgroundScheduler>>) -> usize {
        let pattern_segments: Vec<&str> = glob_pattern.split('/').collect();
        let all_paths = index_all_paths(&self.db, self.optimized_indexing);
        let matching: Vec<String> = all_paths
            .into_iter()
            .filter(|p| path_glob_matches(&pattern_segments, p))
            .collect();

        let mut total = 0;
        for path in matching {
            let keys = index_read_path(&self.db, self.optimized_indexing, &path);
            total += keys.len();
            index_clear_path(&self.db, self.optimized_indexing, &path);
            let db = self.db.clone();
            let optimized = self.optimized_indexing;
            let deletion = move || {
                for key in keys {
                    if let Some(meta) = db
                        .get(format!("meta:{key}"))
                        .ok()
                        .flatten()
                        .and_then(|b| serde_json::from_slice::<CacheEntryMetadata>(&b).ok())
                    {
                        let _ = db.remove(format!("meta:{key}"));
                        let _ = db.remove(format!("body:{key}"));
                        index_remove(&db, optimized, &meta.tags, &meta.url, &key);
                    }
                }
            };
            match scheduler {
                Some(s) => s.wait_until(Box::pin(async move { deletion() })),
                None => deletion(),
            }
        }
        total
    }

    pub fn list_entries(&self, limit: usize, cursor: Option<String>) -> (Vec<String>, Option<String>, bool) {
        let mut keys: Vec<String> = self
            .db
            .scan_prefix("meta:")
            .filter_map(|r| r.ok())
            .filter_map(|(k, _)| String::from_utf8(k.to_vec()).ok())
            .map(|k| k.trim_start_matches("meta:").to_string())
            .collect();
        keys.sort();

        let start = match cursor {
            Some(c) => keys.iter().position(|k| k > &c).unwrap_or(keys.len()),
            None => 0,
        };
        let page: Vec<String> = keys[start..].iter().take(limit).cloned().collect();
        let complete = start + page.len() >= keys.len();
        let next_cursor = if complete { None } else { page.last().cloned() };
        (page, next_cursor, complete)
    }

    pub fn get_stats(&self) -> VariantCacheStats {
        let count = self.db.scan_prefix("meta:").count();
        let size: u64 = self
            .db
            .scan_prefix("body:")
            .filter_map(|r| r.ok())
            .map(|(_, v)| v.len() as u64)
            .sum();
        VariantCacheStats {
            count,
            size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            index_size: index_all_tags(&self.db, self.optimized_indexing).len(),
            optimized: self.optimized_indexing,
            last_pruned: *self.last_pruned.lock().unwrap(),
        }
    }

    /// Prunes expired entries, skipping if the last run was within
    /// `maintenance_interval`.
    pub fn perform_maintenance(&self, max_items: usize, scheduler: Option<&Arc<dyn BackgroundScheduler>>) -> usize {
        let now = now_unix();
        {
            let mut last = self.last_pruned.lock().unwrap();
            if let Some(last_ts) = *last {
                if now - last_ts < self.maintenance_interval.as_secs() {
                    return 0;
                }
            }
            *last = Some(now);
        }

        let expired: Vec<String> = self
            .db
            .scan_prefix("meta:")
            .filter_map(|r| r.ok())
            .filter_map(|(k, v)| {
                let meta: CacheEntryMetadata = serde_json::from_slice(&v).ok()?;
                if meta.is_expired(now) {
                    String::from_utf8(k.to_vec()).ok().map(|k| k.trim_start_matches("meta:").to_string())
                } else {
                    None
                }
            })
            .take(max_items)
            .collect();

        let count = expired.len();
        let db = self.db.clone();
        let optimized = self.optimized_indexing;
        let deletion = move || {
            for key in expired {
                if let Some(meta) = db
                    .get(format!("meta:{key}"))
                    .ok()
                    .flatten()
                    .and_then(|b| serde_json::from_slice::<CacheEntryMetadata>(&b).ok())
                {
                    let _ = db.remove(format!("meta:{key}"));
                    let _ = db.remove(format!("body:{key}"));
                    index_remove(&db, optimized, &meta.tags, &meta.url, &key);
                }
            }
        };
        match scheduler {
            Some(s) => s.wait_until(Box::pin(async move { deletion() })),
            None => deletion(),
        }
        count
    }
}

fn path_glob_matches(pattern_segments: &[&str], path: &str) -> bool {
    let path_segments: Vec<&str> = path.split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return false;
    }
    pattern_segments.iter().zip(path_segments.iter()).all(|(p, s)| *p == "*" || p == s)
}

// -- index storage: monolithic (single JSON doc) vs optimized (per-tag/path
// documents plus an all-tags/all-paths manifest). Both preserve the same
// semantics.

fn index_add(db: &Db, optimized: bool, tags: &[String], path: &str, key: &str) {
    if optimized {
        for tag in tags {
            let mut set = index_read_tag(db, true, tag);
            set.insert(key.to_string());
            let _ = db.insert(format!("tag:{tag}"), serde_json::to_vec(&set).unwrap());
            let mut all_tags = index_all_tags(db, true);
            all_tags.insert(tag.clone());
            let _ = db.insert("all-tags", serde_json::to_vec(&all_tags).unwrap());
        }
        let mut set = index_read_path(db, true, path);
        set.insert(key.to_string());
        let _ = db.insert(format!("path:{path}"), serde_json::to_vec(&set).unwrap());
        let mut all_paths = index_all_paths(db, true);
        all_paths.insert(path.to_string());
        let _ = db.insert("all-paths", serde_json::to_vec(&all_paths).unwrap());
    } else {
        let mut tag_index = read_monolithic(db, "tag_index");
        for tag in tags {
            tag_index.entry(tag.clone()).or_default().insert(key.to_string());
        }
        write_monolithic(db, "tag_index", &tag_index);

        let mut path_index = read_monolithic(db, "path_index");
        path_index.entry(path.to_string()).or_default().insert(key.to_string());
        write_monolithic(db, "path_index", &path_index);
    }
}

fn index_remove(db: &Db, optimized: bool, tags: &[String], path: &str, key: &str) {
    if optimized {
        for tag in tags {
            let mut set = index_read_tag(db, true, tag);
            set.remove(key);
            let _ = db.insert(format!("tag:{tag}"), serde_json::to_vec(&set).unwrap());
        }
        let mut set = index_read_path(db, true, path);
        set.remove(key);
        let _ = db.insert(format!("path:{path}"), serde_json::to_vec(&set).unwrap());
    } else {
        let mut tag_index = read_monolithic(db, "tag_index");
        for tag in tags {
            if let Some(set) = tag_index.get_mut(tag) {
                set.remove(key);
            }
        }
        write_monolithic(db, "tag_index", &tag_index);

        let mut path_index = read_monolithic(db, "path_index");
        if let Some(set) = path_index.get_mut(path) {
            set.remove(key);
        }
        write_monolithic(db, "path_index", &path_index);
    }
}

fn index_read_tag(db: &Db, optimized: bool, tag: &str) -> HashSet<String> {
    if optimized {
        db.get(format!("tag:{tag}"))
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_slice(&v).ok())
            .unwrap_or_default()
    } else {
        read_monolithic(db, "tag_index").remove(tag).unwrap_or_default()
    }
}

fn index_read_path(db: &Db, optimized: bool, path: &str) -> HashSet<String> {
    if optimized {
        db.get(format!("path:{path}"))
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_slice(&v).ok())
            .unwrap_or_default()
    } else {
        read_monolithic(db, "path_index").remove(path).unwrap_or_default()
    }
}

fn index_clear_tag(db: &Db, optimized: bool, tag: &str) {
    if optimized {
        let _ = db.remove(format!("tag:{tag}"));
    } else {
        let mut tag_index = read_monolithic(db, "tag_index");
        tag_index.remove(tag);
        write_monolithic(db, "tag_index", &tag_index);
    }
}

fn index_clear_path(db: &Db, optimized: bool, path: &str) {
    if optimized {
        let _ = db.remove(format!("path:{path}"));
    } else {
        let mut path_index = read_monolithic(db, "path_index");
        path_index.remove(path);
        write_monolithic(db, "path_index", &path_index);
    }
}

fn index_all_tags(db: &Db, optimized: bool) -> BTreeSet<String> {
    if optimized {
        db.get("all-tags").ok().flatten().and_then(|v| serde_json::from_slice(&v).ok()).unwrap_or_default()
    } else {
        read_monolithic(db, "tag_index").keys().cloned().collect()
    }
}

fn index_all_paths(db: &Db, optimized: bool) -> BTreeSet<String> {
    if optimized {
        db.get("all-paths").ok().flatten().and_then(|v| serde_json::from_slice(&v).ok()).unwrap_or_default()
    } else {
        read_monolithic(db, "path_index").keys().cloned().collect()
    }
}

fn read_monolithic(db: &Db, key: &str) -> std::collections::BTreeMap<String, HashSet<String>> {
    db.get(key).ok().flatten().and_then(|v| serde_json::from_slice(&v).ok()).unwrap_or_default()
}

fn write_monolithic(db: &Db, key: &str, value: &std::collections::BTreeMap<String, HashSet<String>>) {
    let _ = db.insert(key, serde_json::to_vec(value).unwrap());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(optimized: bool) -> VariantCache {
        let db = sled::Config::new().temporary(true).open().unwrap();
        VariantCache::new(db, true, 10 * 1024 * 1024, optimized, 500, 1024, false, Duration::from_secs(300), vec![])
    }

    fn meta(tags: Vec<&str>, ttl: u64) -> CacheEntryMetadata {
        CacheEntryMetadata {
            url: "/cat.jpg".to_string(),
            timestamp: 0,
            content_type: "image/webp".to_string(),
            size: 0,
            transform_options: serde_json::json!({}),
            tags: tags.into_iter().map(str::to_string).collect(),
            ttl,
            expiration: 0,
            original_size: 100,
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let cache = cache(false);
        cache.put("k1", "/cat.jpg", b"bytes", meta(vec!["edgeimg-type-image"], 3600), None).unwrap();
        let (body, m) = cache.get("k1", "/cat.jpg").unwrap();
        assert_eq!(body, b"bytes");
        assert_eq!(m.tags, vec!["edgeimg-type-image"]);
    }

    #[test]
    fn purge_by_tag_removes_all_matching_entries_optimized() {
        let cache = cache(true);
        cache.put("k1", "/a.jpg", b"1", meta(vec!["shared"], 3600), None).unwrap();
        cache.put("k2", "/b.jpg", b"2", meta(vec!["shared"], 3600), None).unwrap();
        let purged = cache.purge_by_tag("shared", None);
        assert_eq!(purged, 2);
        assert!(cache.get("k1", "/a.jpg").is_none());
        assert!(cache.get("k2", "/b.jpg").is_none());
    }

    #[test]
    fn purge_by_path_glob_matches_single_segment() {
        let cache = cache(false);
        cache.put("k1", "/images/a.jpg", b"1", meta(vec![], 3600), None).unwrap();
        cache.put("k2", "/images/b.jpg", b"2", meta(vec![], 3600), None).unwrap();
        cache.put("k3", "/other/c.jpg", b"3", meta(vec![], 3600), None).unwrap();
        let purged = cache.purge_by_path("/images/*", None);
        assert_eq!(purged, 2);
        assert!(cache.get("k3", "/other/c.jpg").is_some());
    }

    #[test]
    fn disallowed_path_rejects_put() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let cache = VariantCache::new(db, true, 1024, false, 500, 1024, false, Duration::from_secs(300), vec!["/admin".to_string()]);
        let err = cache.put("k1", "/admin/x.jpg", b"1", meta(vec![], 3600), None).unwrap_err();
        assert!(matches!(err, VariantCacheError::DisallowedPath));
    }
}
