//! Parameter Registry & Parsers: three dialects, native, compact, and
//! Akamai Image Manager, feed a single prioritized parameter list that a
//! merger collapses into one `TransformOptions`.

pub mod akamai;
pub mod compact;
pub mod native;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Which dialect contributed a parameter. Tie-break order on equal priority
/// is `Native > Akamai > Compact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamSource {
    Native,
    Akamai,
    Compact,
}

impl ParamSource {
    fn tie_break_rank(self) -> u8 {
        match self {
            ParamSource::Native => 2,
            ParamSource::Akamai => 1,
            ParamSource::Compact => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Structured(JsonValue),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Text(s) => match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Text(s) => write!(f, "{}", s),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Structured(v) => write!(f, "{}", v),
        }
    }
}

/// One parsed parameter.
#[derive(Debug, Clone)]
pub struct TransformParameter {
    pub name: String,
    pub value: ParamValue,
    pub source: ParamSource,
    pub priority: i32,
    pub alias_for: Option<String>,
}

impl TransformParameter {
    pub fn new(
        name: impl Into<String>,
        value: ParamValue,
        source: ParamSource,
        priority: i32,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            source,
            priority,
            alias_for: None,
        }
    }

    pub fn with_alias(mut self, alias_for: impl Into<String>) -> Self {
        self.alias_for = Some(alias_for.into());
        self
    }

    /// After alias resolution, the registry name this parameter writes to.
    pub fn target_name(&self) -> &str {
        self.alias_for.as_deref().unwrap_or(&self.name)
    }
}

/// Registry value kinds for the native parser registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Number,
    AutoOrNumber,
    Boolean,
    Enum,
    String,
    Coordinate,
    SizeCode,
    Structured,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub kind: RegistryKind,
    pub priority: i32,
    pub default: Option<ParamValue>,
}

/// Priority bands for the merger: explicit dialect-specific parameters >
/// named transforms > policy-derived > unknown.
pub mod priority {
    pub const EXPLICIT: i32 = 400;
    pub const NAMED_TRANSFORM: i32 = 300;
    pub const POLICY_DERIVED: i32 = 200;
    pub const LOW_CONFIDENCE: i32 = 100;
    pub const UNKNOWN: i32 = 0;
}

/// Central parameter registry: name -> typed coercion rule.
///
/// `imwidth`/`imheight` are kept distinct from `width`/`height` with a lower
/// priority, per the Open Question decision recorded in DESIGN.md (the
/// source keeps both with different priorities rather than aliasing them).
pub fn registry() -> HashMap<&'static str, RegistryEntry> {
    use RegistryKind::*;
    let mut m = HashMap::new();
    let mut put = |name: &'static str, kind: RegistryKind, pr: i32| {
        m.insert(
            name,
            RegistryEntry {
                kind,
                priority: pr,
                default: None,
            },
        );
    };
    put("width", Number, priority::EXPLICIT);
    put("height", Number, priority::EXPLICIT);
    put("imwidth", Number, priority::LOW_CONFIDENCE);
    put("imheight", Number, priority::LOW_CONFIDENCE);
    put("fit", Enum, priority::EXPLICIT);
    put("format", Enum, priority::EXPLICIT);
    put("quality", Number, priority::EXPLICIT);
    put("gravity", Enum, priority::EXPLICIT);
    put("focal", Coordinate, priority::EXPLICIT);
    put("aspect", String, priority::EXPLICIT);
    put("derivative", String, priority::EXPLICIT);
    put("smart", Boolean, priority::EXPLICIT);
    put("ctx", Boolean, priority::EXPLICIT);
    put("draw", Structured, priority::EXPLICIT);
    put("tenant", String, priority::EXPLICIT);
    put("background", String, priority::EXPLICIT);
    put("blur", AutoOrNumber, priority::EXPLICIT);
    put("rotate", Number, priority::EXPLICIT);
    put("sharpen", AutoOrNumber, priority::EXPLICIT);
    m
}

/// Coerces a raw string value per the registry entry's kind. Returns `None`
/// (dropping the parameter with a warning breadcrumb) on invalid numeric
/// coercions.
pub fn coerce(kind: RegistryKind, raw: &str) -> Option<ParamValue> {
    match kind {
        RegistryKind::Number | RegistryKind::Coordinate => {
            raw.parse::<f64>().ok().map(ParamValue::Number)
        }
        RegistryKind::AutoOrNumber => {
            if raw.eq_ignore_ascii_case("auto") {
                Some(ParamValue::Text("auto".into()))
            } else {
                raw.parse::<f64>().ok().map(ParamValue::Number)
            }
        }
        RegistryKind::Boolean => match raw {
            "1" | "true" | "yes" => Some(ParamValue::Bool(true)),
            "0" | "false" | "no" => Some(ParamValue::Bool(false)),
            _ => None,
        },
        RegistryKind::Enum | RegistryKind::String | RegistryKind::SizeCode => {
            Some(ParamValue::Text(raw.to_string()))
        }
        RegistryKind::Structured => {
            serde_json::from_str(raw).ok().map(ParamValue::Structured)
        }
    }
}

/// The merged, normalized contract passed to the transformer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Option<String>,
    pub format: Option<String>,
    pub quality: Option<u8>,
    pub gravity: Option<String>,
    pub focal: Option<String>,
    pub aspect: Option<String>,
    pub derivative: Option<String>,
    pub smart: bool,
    pub ctx: bool,
    pub draw: Option<JsonValue>,
    pub tenant: Option<String>,
    pub background: Option<String>,
    pub blur: Option<String>,
    pub rotate: Option<f64>,
    pub sharpen: Option<String>,
    pub path: Option<String>,
    /// Unregistered keys, carried through verbatim at low priority.
    pub extra: BTreeMap<String, JsonValue>,
}

impl TransformOptions {
    /// Canonical JSON form used as the fingerprint input: keys sorted
    /// recursively, `__`-prefixed internal fields excluded.
    pub fn canonical_json(&self) -> JsonValue {
        let mut map = serde_json::Map::new();
        macro_rules! put_opt {
            ($key:literal, $val:expr) => {
                if let Some(v) = $val {
                    map.insert($key.to_string(), serde_json::json!(v));
                }
            };
        }
        put_opt!("width", self.width);
        put_opt!("height", self.height);
        put_opt!("fit", self.fit.clone());
        put_opt!("format", self.format.clone());
        put_opt!("quality", self.quality);
        put_opt!("gravity", self.gravity.clone());
        put_opt!("focal", self.focal.clone());
        put_opt!("aspect", self.aspect.clone());
        put_opt!("derivative", self.derivative.clone());
        if self.smart {
            map.insert("smart".to_string(), serde_json::json!(true));
        }
        if self.ctx {
            map.insert("ctx".to_string(), serde_json::json!(true));
        }
        put_opt!("draw", self.draw.clone());
        put_opt!("tenant", self.tenant.clone());
        put_opt!("background", self.background.clone());
        put_opt!("blur", self.blur.clone());
        put_opt!("rotate", self.rotate);
        put_opt!("sharpen", self.sharpen.clone());
        for (k, v) in &self.extra {
            if !k.starts_with("__") {
                map.insert(k.clone(), v.clone());
            }
        }
        canonical_sort(JsonValue::Object(map))
    }
}

/// Recursively sorts object keys so that two semantically equal values
/// serialize identically regardless of insertion order.
pub fn canonical_sort(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let sorted: BTreeMap<String, JsonValue> = map
                .into_iter()
                .filter(|(k, _)| !k.starts_with("__"))
                .map(|(k, v)| (k, canonical_sort(v)))
                .collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(canonical_sort).collect()),
        other => other,
    }
}

/// Merger: partitions by name, picks the highest-priority candidate (ties
/// broken by source order), applies registry coercion, and emits
/// `TransformOptions`.
pub fn merge(params: Vec<TransformParameter>) -> TransformOptions {
    let reg = registry();
    let mut winners: HashMap<String, TransformParameter> = HashMap::new();

    for p in params {
        let name = p.target_name().to_string();
        match winners.get(&name) {
            None => {
                winners.insert(name, p);
            }
            Some(existing) => {
                let better = p.priority > existing.priority
                    || (p.priority == existing.priority
                        && p.source.tie_break_rank() > existing.source.tie_break_rank());
                // `draw` is never overwritten by a lower-priority `draw` from
                // a different source.
                if name == "draw" {
                    if p.priority > existing.priority {
                        winners.insert(name, p);
                    }
                } else if better {
                    winners.insert(name, p);
                }
            }
        }
    }

    // `width`/`imwidth` (and `height`/`imheight`) both feed `opts.width`, but
    // live as distinct registry entries with different priorities (see the
    // Open Question decision above). Resolve that pair explicitly before the
    // generic pass below, so the outcome follows registry priority rather
    // than `HashMap` iteration order.
    resolve_aliased_dimension(&mut winners, "width", "imwidth");
    resolve_aliased_dimension(&mut winners, "height", "imheight");

    // Sorted for determinism; no two remaining names compete for the same
    // `TransformOptions` field, so order no longer changes the outcome, but
    // a stable iteration order keeps behavior reproducible regardless.
    let mut entries: Vec<_> = winners.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut opts = TransformOptions::default();
    for (name, param) in entries {
        let registered = reg.get(name.as_str());
        apply_field(&mut opts, &name, &param.value, registered.map(|r| r.kind));
    }
    opts
}

/// When both `primary` (e.g. `width`) and `fallback` (e.g. `imwidth`) won
/// their own slot in `winners`, keeps only whichever has the higher
/// registry priority (ties favor `primary`) under the `primary` key, so the
/// generic pass below sees a single, unambiguous winner.
fn resolve_aliased_dimension(
    winners: &mut HashMap<String, TransformParameter>,
    primary: &str,
    fallback: &str,
) {
    if let Some(alt) = winners.remove(fallback) {
        match winners.get(primary) {
            Some(existing) if existing.priority >= alt.priority => {}
            _ => {
                winners.insert(primary.to_string(), alt);
            }
        }
    }
}

fn apply_field(
    opts: &mut TransformOptions,
    name: &str,
    value: &ParamValue,
    _kind: Option<RegistryKind>,
) {
    match name {
        "width" => opts.width = value.as_f64().map(|v| v.max(0.0) as u32),
        "height" => opts.height = value.as_f64().map(|v| v.max(0.0) as u32),
        "fit" => opts.fit = value.as_str().map(str::to_string),
        "format" => opts.format = value.as_str().map(|s| s.to_lowercase()),
        "quality" => opts.quality = value.as_f64().map(|v| v.clamp(1.0, 100.0) as u8),
        "gravity" => opts.gravity = value.as_str().map(str::to_string),
        "focal" => opts.focal = value.as_str().map(str::to_string),
        "aspect" => opts.aspect = value.as_str().map(str::to_string),
        "derivative" => opts.derivative = value.as_str().map(str::to_string),
        "smart" => opts.smart = value.as_bool().unwrap_or(false),
        "ctx" => opts.ctx = value.as_bool().unwrap_or(false),
        "draw" => {
            opts.draw = match value {
                ParamValue::Structured(v) => Some(v.clone()),
                other => Some(JsonValue::String(other.to_string())),
            }
        }
        "tenant" => opts.tenant = value.as_str().map(str::to_string),
        "background" => opts.background = value.as_str().map(str::to_string),
        "blur" => opts.blur = value.as_str().map(str::to_string).or_else(|| value.as_f64().map(|v| v.to_string())),
        "rotate" => opts.rotate = value.as_f64(),
        "sharpen" => opts.sharpen = value.as_str().map(str::to_string).or_else(|| value.as_f64().map(|v| v.to_string())),
        other => {
            opts.extra.insert(
                other.to_string(),
                match value {
                    ParamValue::Structured(v) => v.clone(),
                    v => JsonValue::String(v.to_string()),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_priority_beats_compact_f() {
        let params = vec![
            TransformParameter::new("width", ParamValue::Number(800.0), ParamSource::Native, priority::EXPLICIT),
            TransformParameter::new("f", ParamValue::Text("webp".into()), ParamSource::Compact, priority::EXPLICIT)
                .with_alias("format"),
        ];
        let opts = merge(params);
        assert_eq!(opts.width, Some(800));
        assert_eq!(opts.format, Some("webp".into()));
    }

    #[test]
    fn native_wins_tie_break_over_compact() {
        let params = vec![
            TransformParameter::new("width", ParamValue::Number(100.0), ParamSource::Compact, priority::EXPLICIT),
            TransformParameter::new("width", ParamValue::Number(200.0), ParamSource::Native, priority::EXPLICIT),
        ];
        let opts = merge(params);
        assert_eq!(opts.width, Some(200));
    }

    #[test]
    fn draw_never_overwritten_by_lower_priority_draw() {
        let high = serde_json::json!([{"url": "https://x/a.png"}]);
        let low = serde_json::json!([{"url": "https://x/b.png"}]);
        let params = vec![
            TransformParameter::new("draw", ParamValue::Structured(high.clone()), ParamSource::Akamai, priority::NAMED_TRANSFORM),
            TransformParameter::new("draw", ParamValue::Structured(low), ParamSource::Native, priority::POLICY_DERIVED),
        ];
        let opts = merge(params);
        assert_eq!(opts.draw, Some(high));
    }

    #[test]
    fn canonical_json_ignores_key_order_and_internal_fields() {
        let mut a = TransformOptions::default();
        a.width = Some(100);
        a.format = Some("webp".into());
        a.extra.insert("__internal".into(), serde_json::json!(true));

        let mut b = TransformOptions::default();
        b.format = Some("webp".into());
        b.width = Some(100);

        assert_eq!(a.canonical_json(), b.canonical_json());
    }
}
