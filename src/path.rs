//! Path Service: pure functions over request paths.

use std::collections::BTreeMap;

/// Ensures a leading `/`, collapses repeated slashes, strips a trailing
/// slash except for the root path.
pub fn normalize(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len() + 1);
    collapsed.push('/');
    let mut prev_was_slash = true; // swallow leading slashes from `path`
    for c in path.chars() {
        if c == '/' {
            if !prev_was_slash {
                collapsed.push('/');
            }
            prev_was_slash = true;
        } else {
            collapsed.push(c);
            prev_was_slash = false;
        }
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    collapsed
}

/// Extracts inline `_key=value` segments from anywhere in the path, e.g.
/// `/img/_width=400/cat.jpg` -> `("/img/cat.jpg", {"width": "400"})`.
pub fn parse_image_path(path: &str) -> (String, BTreeMap<String, String>) {
    let mut options = BTreeMap::new();
    let mut kept_segments = Vec::new();

    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        if let Some(rest) = segment.strip_prefix('_') {
            if let Some((k, v)) = rest.split_once('=') {
                options.insert(k.to_string(), v.to_string());
                continue;
            }
        }
        kept_segments.push(segment);
    }

    let cleaned = if kept_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", kept_segments.join("/"))
    };
    (cleaned, options)
}

/// Removes a known derivative-name segment if present, returning the
/// cleaned path and the matched derivative name.
pub fn extract_derivative(path: &str, known_derivatives: &[String]) -> (String, Option<String>) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut found = None;
    let mut kept = Vec::with_capacity(segments.len());
    for segment in segments {
        if found.is_none() && known_derivatives.iter().any(|d| d == segment) {
            found = Some(segment.to_string());
            continue;
        }
        kept.push(segment);
    }
    let cleaned = if kept.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", kept.join("/"))
    };
    (cleaned, found)
}

/// One prefix-rewrite rule, matched against the path's first segment.
#[derive(Debug, Clone)]
pub struct PathTransformRule {
    pub match_prefix: String,
    pub add_prefix: Option<String>,
    pub remove_prefix: bool,
}

/// Applies the first matching rule's prefix add/remove to the path.
pub fn apply_transformations(path: &str, rules: &[PathTransformRule]) -> String {
    let trimmed = path.trim_start_matches('/');
    let first_segment = trimmed.split('/').next().unwrap_or("");

    for rule in rules {
        if rule.match_prefix != first_segment {
            continue;
        }
        let mut rest = trimmed.to_string();
        if rule.remove_prefix {
            rest = trimmed
                .strip_prefix(first_segment)
                .unwrap_or(trimmed)
                .trim_start_matches('/')
                .to_string();
        }
        if let Some(prefix) = &rule.add_prefix {
            return normalize(&format!("/{}/{}", prefix.trim_matches('/'), rest));
        }
        return normalize(&format!("/{}", rest));
    }
    normalize(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_slashes_and_strips_trailing() {
        assert_eq!(normalize("foo//bar/"), "/foo/bar");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn parse_image_path_extracts_inline_options_anywhere() {
        let (cleaned, opts) = parse_image_path("/img/_width=400/cat.jpg");
        assert_eq!(cleaned, "/img/cat.jpg");
        assert_eq!(opts.get("width"), Some(&"400".to_string()));
    }

    #[test]
    fn extract_derivative_removes_known_segment() {
        let derivatives = vec!["thumbnail".to_string()];
        let (cleaned, derivative) = extract_derivative("/thumbnail/cat.jpg", &derivatives);
        assert_eq!(cleaned, "/cat.jpg");
        assert_eq!(derivative, Some("thumbnail".to_string()));
    }

    #[test]
    fn extract_derivative_leaves_path_untouched_when_absent() {
        let derivatives = vec!["thumbnail".to_string()];
        let (cleaned, derivative) = extract_derivative("/cat.jpg", &derivatives);
        assert_eq!(cleaned, "/cat.jpg");
        assert_eq!(derivative, None);
    }

    #[test]
    fn apply_transformations_rewrites_matching_prefix() {
        let rules = vec![PathTransformRule {
            match_prefix: "assets".to_string(),
            add_prefix: Some("static".to_string()),
            remove_prefix: true,
        }];
        assert_eq!(apply_transformations("/assets/cat.jpg", &rules), "/static/cat.jpg");
    }
}
