//! Native parser: every recognized key from the central parameter registry
//! is converted to its typed value; unknown keys are kept with low
//! priority.

use super::{coerce, priority, registry, ParamSource, ParamValue, TransformParameter};

/// Every native query-string key is a candidate; `canParse` for the native
/// dialect is "always applicable" (it is the fallback dialect).
pub fn can_parse(_query: &std::collections::BTreeMap<String, String>) -> bool {
    true
}

pub fn parse(query: &std::collections::BTreeMap<String, String>) -> Vec<TransformParameter> {
    let reg = registry();
    let mut out = Vec::new();
    for (key, raw) in query {
        if matches!(key.as_str(), "url" | "sig" | "t" | "debug") {
            // url/sig/t/debug are request plumbing, not transform parameters.
            continue;
        }
        if let Some(entry) = reg.get(key.as_str()) {
            if let Some(value) = coerce(entry.kind, raw) {
                out.push(TransformParameter::new(
                    key.clone(),
                    value,
                    ParamSource::Native,
                    entry.priority,
                ));
            }
            // Invalid coercions are silently dropped; the caller is expected
            // to log a warning breadcrumb.
        } else {
            out.push(TransformParameter::new(
                key.clone(),
                ParamValue::Text(raw.clone()),
                ParamSource::Native,
                priority::UNKNOWN,
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn parses_known_and_unknown_keys() {
        let mut q = BTreeMap::new();
        q.insert("width".into(), "800".into());
        q.insert("nonsense".into(), "value".into());
        let params = parse(&q);
        assert!(params.iter().any(|p| p.name == "width"));
        assert!(params
            .iter()
            .any(|p| p.name == "nonsense" && p.priority == priority::UNKNOWN));
    }

    #[test]
    fn drops_invalid_numeric_coercion() {
        let mut q = BTreeMap::new();
        q.insert("width".into(), "not-a-number".into());
        let params = parse(&q);
        assert!(!params.iter().any(|p| p.name == "width"));
    }
}
