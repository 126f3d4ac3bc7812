//! Cache Tags Manager: deterministic tag generation from
//! request + storage result + transform options.

use std::collections::BTreeMap;

use regex::Regex;

use crate::config::ConditionalTagRule;
use crate::params::TransformOptions;
use crate::storage::StorageResult;

#[derive(Debug, Clone, Default)]
pub struct TagRequestInfo {
    pub path: String,
    pub host: String,
    pub query: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheTagGenerationError {
    #[error("invalid path for tag generation: {0}")]
    InvalidPath(String),
}

fn size_bucket(bytes: usize) -> &'static str {
    match bytes {
        0..=10_239 => "tiny",
        10_240..=102_399 => "small",
        102_400..=1_048_575 => "medium",
        1_048_576..=10_485_759 => "large",
        10_485_760..=104_857_599 => "xlarge",
        _ => "huge",
    }
}

fn width_bucket(width: u32) -> &'static str {
    match width {
        0..=159 => "tiny",
        160..=479 => "small",
        480..=959 => "medium",
        960..=1919 => "large",
        1920..=3839 => "xlarge",
        _ => "huge",
    }
}

/// Whether `rule`'s predicate matches this request. Every configured field
/// must match; an unset field is skipped rather than treated as a match.
fn conditional_rule_matches(
    rule: &ConditionalTagRule,
    request: &TagRequestInfo,
    storage: &StorageResult,
    options: &TransformOptions,
) -> bool {
    if let Some(pattern) = &rule.path {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(&request.path) => {}
            _ => return false,
        }
    }
    if let Some(format) = &rule.format {
        if options.format.as_deref() != Some(format.as_str()) {
            return false;
        }
    }
    if let Some(pattern) = &rule.content_type {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(&storage.content_type) => {}
            _ => return false,
        }
    }
    if let Some(host) = &rule.host {
        if &request.host != host {
            return false;
        }
    }
    if let Some(param) = &rule.query_param {
        if !request.query.contains_key(param) {
            return false;
        }
    }
    true
}

/// Generates the deterministic tag list for one transform result, plus any
/// configured conditional tags whose predicate matches.
pub fn build_tags(
    prefix: &str,
    request: &TagRequestInfo,
    storage: &StorageResult,
    options: &TransformOptions,
    conditional_rules: &[ConditionalTagRule],
) -> Result<Vec<String>, CacheTagGenerationError> {
    if !request.path.starts_with('/') {
        return Err(CacheTagGenerationError::InvalidPath(request.path.clone()));
    }

    let mut tags = Vec::new();
    let mut push = |tag: String| tags.push(format!("{prefix}-{tag}"));

    let segments: Vec<&str> = request.path.split('/').filter(|s| !s.is_empty()).collect();
    for (i, seg) in segments.iter().enumerate() {
        push(format!("segment-{i}-{seg}"));
    }
    if let Some(parent) = segments.split_last().map(|(_, rest)| rest.join("/")) {
        push(format!("dir-{parent}"));
    }
    push(format!("path-{}", request.path));

    push("type-image".to_string());
    let subtype = storage.content_type.split('/').nth(1).unwrap_or("octet-stream");
    push(format!("content-image-{subtype}"));

    push(format!("origin-{}", storage.source_type.as_str()));
    push(format!("host-{}", request.host));

    push(format!("size-{}", size_bucket(storage.size)));
    if let Some(w) = options.width {
        push(format!("width-{}", width_bucket(w)));
        push(format!("width-{w}"));
    }
    if let Some(h) = options.height {
        push(format!("height-{h}"));
    }
    if let Some(fmt) = &options.format {
        push(format!("format-{fmt}"));
    }
    if let Some(q) = options.quality {
        push(format!("quality-{q}"));
    }
    if let Some(d) = &options.derivative {
        push(format!("derivative-{d}"));
    }
    if options.smart {
        push("feature-smart".to_string());
    }
    if options.draw.is_some() {
        push("watermark-true".to_string());
    }

    if let Some(custom) = request.query.get("cache-tags") {
        for tag in custom.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            push(tag.to_string());
        }
    }
    if let Some(tenant) = request.query.get("tenant").cloned().or_else(|| options.tenant.clone()) {
        push(format!("tenant-{tenant}"));
    }

    for rule in conditional_rules {
        if conditional_rule_matches(rule, request, storage, options) {
            push(rule.tag.clone());
        }
    }

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SourceType;

    #[test]
    fn generates_expected_tag_families() {
        let request = TagRequestInfo {
            path: "/images/cats/cat.jpg".to_string(),
            host: "cdn.example.com".to_string(),
            query: BTreeMap::new(),
        };
        let storage = StorageResult::new(vec![0u8; 2000], SourceType::R2, "image/jpeg", "/images/cats/cat.jpg");
        let mut options = TransformOptions::default();
        options.width = Some(800);
        options.format = Some("webp".into());

        let tags = build_tags("edgeimg", &request, &storage, &options, &[]).unwrap();
        assert!(tags.contains(&"edgeimg-path-/images/cats/cat.jpg".to_string()));
        assert!(tags.contains(&"edgeimg-origin-r2".to_string()));
        assert!(tags.contains(&"edgeimg-content-image-jpeg".to_string()));
        assert!(tags.contains(&"edgeimg-format-webp".to_string()));
        assert!(tags.contains(&"edgeimg-width-800".to_string()));
    }

    #[test]
    fn rejects_path_without_leading_slash() {
        let request = TagRequestInfo {
            path: "cat.jpg".to_string(),
            host: "cdn.example.com".to_string(),
            query: BTreeMap::new(),
        };
        let storage = StorageResult::new(vec![], SourceType::R2, "image/jpeg", "cat.jpg");
        let options = TransformOptions::default();
        assert!(build_tags("edgeimg", &request, &storage, &options, &[]).is_err());
    }

    #[test]
    fn conditional_rule_contributes_tag_when_predicate_matches() {
        let request = TagRequestInfo {
            path: "/blog/post/hero.jpg".to_string(),
            host: "cdn.example.com".to_string(),
            query: BTreeMap::new(),
        };
        let storage = StorageResult::new(vec![0u8; 10], SourceType::R2, "image/jpeg", "/blog/post/hero.jpg");
        let options = TransformOptions::default();
        let rules = vec![
            crate::config::ConditionalTagRule {
                tag: "blog-content".to_string(),
                path: Some(r"^/blog/".to_string()),
                format: None,
                content_type: None,
                host: None,
                query_param: None,
            },
            crate::config::ConditionalTagRule {
                tag: "never-matches".to_string(),
                path: Some(r"^/videos/".to_string()),
                format: None,
                content_type: None,
                host: None,
                query_param: None,
            },
        ];

        let tags = build_tags("edgeimg", &request, &storage, &options, &rules).unwrap();
        assert!(tags.contains(&"edgeimg-blog-content".to_string()));
        assert!(!tags.contains(&"edgeimg-never-matches".to_string()));
    }
}
