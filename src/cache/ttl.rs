//! TTL Calculator: status- and path-pattern-based TTL with derivative and
//! content-type overrides.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `PathPattern`: `{ name, matcher (regex), ttl { ok,
/// redirects, clientError, serverError }, priority, description }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPattern {
    pub name: String,
    pub matcher: String,
    pub ttl: StatusTtl,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusTtl {
    pub ok: u64,
    pub redirects: u64,
    pub client_error: u64,
    pub server_error: u64,
}

impl Default for StatusTtl {
    fn default() -> Self {
        Self {
            ok: 86400,
            redirects: 3600,
            client_error: 60,
            server_error: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Ok,
    Redirect,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => StatusClass::Ok,
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }
}

impl StatusTtl {
    fn for_class(&self, class: StatusClass) -> u64 {
        match class {
            StatusClass::Ok => self.ok,
            StatusClass::Redirect => self.redirects,
            StatusClass::ClientError => self.client_error,
            StatusClass::ServerError => self.server_error,
        }
    }
}

pub struct TtlCalculator {
    compiled: Vec<(PathPattern, Regex)>,
    derivative_overrides: BTreeMap<String, u64>,
    immutable_paths: Vec<String>,
    immutable_content_types: Vec<String>,
    immutable_derivatives: Vec<String>,
    min_ttl: u64,
    max_ttl: u64,
}

impl TtlCalculator {
    pub fn new(
        patterns: Vec<(PathPattern, Regex)>,
        derivative_overrides: BTreeMap<String, u64>,
        immutable_paths: Vec<String>,
        immutable_content_types: Vec<String>,
        immutable_derivatives: Vec<String>,
        min_ttl: u64,
        max_ttl: u64,
    ) -> Self {
        let mut compiled = patterns;
        // Highest priority wins; ties broken by first-listed (stable sort).
        compiled.sort_by(|(a, _), (b, _)| b.priority.cmp(&a.priority));
        Self {
            compiled,
            derivative_overrides,
            immutable_paths,
            immutable_content_types,
            immutable_derivatives,
            min_ttl,
            max_ttl,
        }
    }

    fn select_pattern(&self, path: &str) -> Option<&(PathPattern, Regex)> {
        self.compiled.iter().find(|(_, re)| re.is_match(path))
    }

    /// Computes the final, clamped TTL for a response.
    pub fn calculate(&self, path: &str, status: u16, content_type: &str, derivative: Option<&str>) -> u64 {
        if let Some(path) = Some(path) {
            if self.immutable_paths.iter().any(|p| p == path) {
                return self.max_ttl;
            }
        }
        if self.immutable_content_types.iter().any(|ct| ct == content_type) {
            return self.max_ttl;
        }
        if let Some(d) = derivative {
            if self.immutable_derivatives.iter().any(|x| x == d) {
                return self.max_ttl;
            }
        }

        let class = StatusClass::from_status(status);
        let mut ttl = match self.select_pattern(path) {
            Some((pattern, _)) => pattern.ttl.for_class(class),
            None => StatusTtl::default().for_class(class),
        };

        if let Some(d) = derivative {
            if let Some(over) = self.derivative_overrides.get(d) {
                ttl = *over;
            }
        }

        if content_type == "image/svg+xml" {
            ttl = (ttl as f64 * 2.0) as u64;
        } else if matches!(content_type, "image/webp" | "image/avif") {
            ttl = (ttl as f64 * 1.5) as u64;
        }

        ttl.clamp(self.min_ttl, self.max_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(name: &str, matcher: &str, priority: i32, ok: u64) -> (PathPattern, Regex) {
        let re = Regex::new(matcher).unwrap();
        (
            PathPattern {
                name: name.to_string(),
                matcher: matcher.to_string(),
                ttl: StatusTtl { ok, ..StatusTtl::default() },
                priority,
                description: String::new(),
            },
            re,
        )
    }

    #[test]
    fn highest_priority_matching_pattern_wins() {
        let calc = TtlCalculator::new(
            vec![pattern("generic", "^/", 0, 100), pattern("images", "^/img/", 10, 500)],
            BTreeMap::new(),
            vec![],
            vec![],
            vec![],
            1,
            1_000_000,
        );
        assert_eq!(calc.calculate("/img/cat.jpg", 200, "image/jpeg", None), 500);
    }

    #[test]
    fn immutable_content_type_forces_max_ttl() {
        let calc = TtlCalculator::new(
            vec![pattern("generic", "^/", 0, 100)],
            BTreeMap::new(),
            vec![],
            vec!["image/jpeg".to_string()],
            vec![],
            1,
            999_999,
        );
        assert_eq!(calc.calculate("/x.jpg", 200, "image/jpeg", None), 999_999);
    }

    #[test]
    fn derivative_override_replaces_pattern_ttl() {
        let mut overrides = BTreeMap::new();
        overrides.insert("thumbnail".to_string(), 42);
        let calc = TtlCalculator::new(
            vec![pattern("generic", "^/", 0, 500)],
            overrides,
            vec![],
            vec![],
            vec![],
            1,
            100_000,
        );
        assert_eq!(calc.calculate("/x.jpg", 200, "image/jpeg", Some("thumbnail")), 42);
    }

    #[test]
    fn result_is_clamped_to_configured_range() {
        let calc = TtlCalculator::new(
            vec![pattern("generic", "^/", 0, 5)],
            BTreeMap::new(),
            vec![],
            vec![],
            vec![],
            60,
            100_000,
        );
        assert_eq!(calc.calculate("/x.jpg", 200, "image/jpeg", None), 60);
    }
}
