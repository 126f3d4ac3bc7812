//! Compact parser: single-letter aliases.
//! `w->width, h->height, r->aspect, p->focal, f->size-code, s->context-aware`.

use super::{coerce, registry, ParamSource, ParamValue, TransformParameter};
use std::collections::BTreeMap;

const ALIASES: &[(&str, &str)] = &[
    ("w", "width"),
    ("h", "height"),
    ("r", "aspect"),
    ("p", "focal"),
    ("s", "ctx"),
];

/// Preset pixel dimensions for the `f` size-code token (distinct from the
/// `f=webp`-style format token the same letter can also carry).
const SIZE_CODES: &[(&str, u32, u32)] = &[
    ("xs", 160, 160),
    ("s", 320, 320),
    ("m", 640, 640),
    ("l", 1024, 1024),
    ("xl", 2048, 2048),
];

pub fn can_parse(query: &BTreeMap<String, String>) -> bool {
    ALIASES.iter().any(|(alias, _)| query.contains_key(*alias)) || query.contains_key("f")
}

pub fn parse(query: &BTreeMap<String, String>) -> Vec<TransformParameter> {
    let reg = registry();
    let mut out = Vec::new();
    for (alias, target) in ALIASES {
        let Some(raw) = query.get(*alias) else {
            continue;
        };
        let Some(entry) = reg.get(target) else {
            continue;
        };
        if let Some(value) = coerce(entry.kind, raw) {
            out.push(
                TransformParameter::new(alias.to_string(), value, ParamSource::Compact, entry.priority)
                    .with_alias(*target),
            );
        }
    }

    // `f` is dual-purpose: a known format token maps to `format`, anything
    // else is looked up as a size code and expands to `width`+`height`.
    if let Some(raw) = query.get("f") {
        if matches!(raw.as_str(), "jpeg" | "webp" | "avif" | "png") {
            if let Some(entry) = reg.get("format") {
                out.push(
                    TransformParameter::new("f".to_string(), ParamValue::Text(raw.clone()), ParamSource::Compact, entry.priority)
                        .with_alias("format"),
                );
            }
        } else if let Some((_, w, h)) = SIZE_CODES.iter().find(|(code, _, _)| *code == raw.as_str()) {
            if let Some(entry) = reg.get("width") {
                out.push(
                    TransformParameter::new("f".to_string(), ParamValue::Number(*w as f64), ParamSource::Compact, entry.priority)
                        .with_alias("width"),
                );
            }
            if let Some(entry) = reg.get("height") {
                out.push(
                    TransformParameter::new("f".to_string(), ParamValue::Number(*h as f64), ParamSource::Compact, entry.priority)
                        .with_alias("height"),
                );
            }
        }
        // an unrecognized size code is dropped, not fatal to the request.
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_single_letter_aliases() {
        let mut q = BTreeMap::new();
        q.insert("w".into(), "800".into());
        q.insert("h".into(), "600".into());
        q.insert("f".into(), "webp".into());
        let params = parse(&q);
        assert!(params.iter().any(|p| p.target_name() == "width"));
        assert!(params.iter().any(|p| p.target_name() == "height"));
        assert!(params.iter().any(|p| p.target_name() == "format"));
    }

    #[test]
    fn can_parse_detects_dialect_markers() {
        let mut q = BTreeMap::new();
        q.insert("w".into(), "800".into());
        assert!(can_parse(&q));
        let empty = BTreeMap::new();
        assert!(!can_parse(&empty));
    }

    #[test]
    fn size_code_expands_to_width_and_height() {
        let mut q = BTreeMap::new();
        q.insert("f".into(), "m".into());
        let params = parse(&q);
        let width = params.iter().find(|p| p.target_name() == "width").unwrap();
        let height = params.iter().find(|p| p.target_name() == "height").unwrap();
        assert_eq!(width.value.as_f64(), Some(640.0));
        assert_eq!(height.value.as_f64(), Some(640.0));
        assert!(params.iter().all(|p| p.target_name() != "format"));
    }

    #[test]
    fn unrecognized_size_code_is_dropped() {
        let mut q = BTreeMap::new();
        q.insert("f".into(), "huge".into());
        assert!(parse(&q).is_empty());
    }

    #[test]
    fn s_maps_to_context_aware_not_smart() {
        let mut q = BTreeMap::new();
        q.insert("s".into(), "1".into());
        let params = parse(&q);
        assert!(params.iter().any(|p| p.target_name() == "ctx"));
        assert!(params.iter().all(|p| p.target_name() != "smart"));
    }
}
