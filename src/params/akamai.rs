//! Akamai Image Manager parser: two syntactic forms, dot notation
//! (`im.resize=width:400`) and equals notation
//! (`im=AspectCrop=(1,1),f=m,...`). Named transforms are translated into
//! native parameters; `Composite`/`Watermark` tokens are folded into a
//! single `draw` parameter.

use std::collections::BTreeMap;

use serde_json::json;

use super::{priority, ParamSource, ParamValue, TransformParameter};

pub fn can_parse(query: &BTreeMap<String, String>) -> bool {
    query.contains_key("im") || query.keys().any(|k| k.starts_with("im."))
}

pub fn parse(query: &BTreeMap<String, String>) -> Vec<TransformParameter> {
    let mut out = Vec::new();
    let mut composite = CompositeBuilder::default();

    if let Some(raw) = query.get("im") {
        parse_equals_notation(raw, &mut out, &mut composite);
    }

    for (key, raw) in query {
        if let Some(name) = key.strip_prefix("im.") {
            parse_dot_notation(name, raw, &mut out, &mut composite);
        }
    }

    if let Some(draw) = composite.finish() {
        out.push(TransformParameter::new(
            "draw",
            ParamValue::Structured(draw),
            ParamSource::Akamai,
            priority::NAMED_TRANSFORM,
        ));
    }

    out
}

/// Splits `s` on top-level occurrences of `sep`, treating `(`/`)` as a
/// nesting guard so that e.g. `AspectCrop=(16,9),f=m` splits into two
/// tokens rather than three.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth <= 0 => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn strip_parens(s: &str) -> &str {
    let s = s.trim();
    if s.starts_with('(') && s.ends_with(')') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[derive(Default)]
struct CompositeBuilder {
    active: bool,
    url: Option<String>,
    placement: Option<String>,
    dx: Option<f64>,
    dy: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
    scale: Option<f64>,
    opacity: Option<f64>,
}

/// Placement -> edge mapping: `south* -> bottom`, `north* -> top`,
/// `east* -> right`, `west* -> left`, `center -> (top,left)`. Unmapped
/// placements default to bottom-right.
fn map_placement(placement: &str) -> (&'static str, &'static str) {
    let p = placement.to_lowercase();
    if p == "center" {
        return ("top", "left");
    }
    let vertical = if p.contains("south") {
        "bottom"
    } else if p.contains("north") {
        "top"
    } else {
        "bottom"
    };
    let horizontal = if p.contains("east") {
        "right"
    } else if p.contains("west") {
        "left"
    } else {
        "right"
    };
    (vertical, horizontal)
}

impl CompositeBuilder {
    fn finish(self) -> Option<serde_json::Value> {
        let url = self.url?;
        let placement = self.placement.unwrap_or_else(|| "southeast".to_string());
        let (vertical, horizontal) = map_placement(&placement);
        let dx = self.dx.unwrap_or(20.0);
        let dy = self.dy.unwrap_or(20.0);

        let mut entry = serde_json::Map::new();
        entry.insert("url".into(), json!(url));
        entry.insert(vertical.to_string(), json!(dy));
        entry.insert(horizontal.to_string(), json!(dx));
        if let Some(w) = self.width {
            entry.insert("width".into(), json!(w));
        }
        if let Some(h) = self.height {
            entry.insert("height".into(), json!(h));
        }
        if let Some(scale) = self.scale {
            entry.insert("scale".into(), json!(scale));
        }
        if let Some(opacity) = self.opacity {
            entry.insert("opacity".into(), json!(opacity));
        }
        Some(json!([serde_json::Value::Object(entry)]))
    }
}

fn parse_equals_notation(raw: &str, out: &mut Vec<TransformParameter>, composite: &mut CompositeBuilder) {
    let mut focal_x: Option<String> = None;
    let mut focal_y: Option<String> = None;

    for token in split_top_level(raw, ',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (token, None),
        };

        match key.to_lowercase().as_str() {
            "composite" | "watermark" => composite.active = true,
            "image" | "overlay" | "url" => {
                if let Some(v) = value {
                    let inner = strip_parens(v);
                    // `image=(url=https://...)` nests a key=value pair.
                    let url = inner.split_once('=').map(|(_, u)| u).unwrap_or(inner);
                    composite.url = Some(url.to_string());
                }
            }
            "placement" => composite.placement = value.map(str::to_string),
            "dx" => composite.dx = value.and_then(|v| v.parse().ok()),
            "dy" => composite.dy = value.and_then(|v| v.parse().ok()),
            "opacity" => composite.opacity = value.and_then(|v| v.parse().ok()),
            "scale" => composite.scale = value.and_then(|v| v.parse().ok()),
            "width" if composite.active || composite.url.is_some() => {
                composite.width = value.and_then(|v| v.parse().ok())
            }
            "height" if composite.active || composite.url.is_some() => {
                composite.height = value.and_then(|v| v.parse().ok())
            }
            "aspectcrop" => {
                if let Some(v) = value {
                    let parts = split_top_level(strip_parens(v), ',');
                    if parts.len() == 2 {
                        out.push(TransformParameter::new(
                            "aspect",
                            ParamValue::Text(format!("{}:{}", parts[0].trim(), parts[1].trim())),
                            ParamSource::Akamai,
                            priority::NAMED_TRANSFORM,
                        ));
                    }
                }
            }
            "xposition" => focal_x = value.map(str::to_string),
            "yposition" => focal_y = value.map(str::to_string),
            "resize" => {
                if let Some(v) = value {
                    for kv in split_top_level(strip_parens(v), ',') {
                        if let Some((k, v)) = kv.split_once(':') {
                            push_dimension(out, k.trim(), v.trim());
                        }
                    }
                }
            }
            "crop" | "cropfit" if value.is_none() => {
                out.push(TransformParameter::new(
                    "fit",
                    ParamValue::Text("cover".into()),
                    ParamSource::Akamai,
                    priority::POLICY_DERIVED,
                ));
            }
            "impolicy" => {
                if let Some("letterbox") = value {
                    out.push(TransformParameter::new(
                        "fit",
                        ParamValue::Text("pad".into()),
                        ParamSource::Akamai,
                        priority::POLICY_DERIVED,
                    ));
                }
            }
            "blur" => push_scalar(out, "blur", value),
            "rotate" => push_scalar(out, "rotate", value),
            "backgroundcolor" => push_scalar(out, "background", value),
            "mirror" | "grayscale" => {
                out.push(TransformParameter::new(
                    key.to_lowercase(),
                    ParamValue::Bool(true),
                    ParamSource::Akamai,
                    priority::NAMED_TRANSFORM,
                ));
            }
            "facecrop" | "featurecrop" | "smartcrop" => {
                out.push(TransformParameter::new(
                    "smart",
                    ParamValue::Bool(true),
                    ParamSource::Akamai,
                    priority::NAMED_TRANSFORM,
                ));
            }
            _ => {}
        }
    }

    if let (Some(x), Some(y)) = (focal_x, focal_y) {
        out.push(TransformParameter::new(
            "focal",
            ParamValue::Text(format!("{},{}", x, y)),
            ParamSource::Akamai,
            priority::NAMED_TRANSFORM,
        ));
        out.push(TransformParameter::new(
            "ctx",
            ParamValue::Bool(true),
            ParamSource::Akamai,
            priority::NAMED_TRANSFORM,
        ));
    }
}

fn parse_dot_notation(
    name: &str,
    raw: &str,
    out: &mut Vec<TransformParameter>,
    composite: &mut CompositeBuilder,
) {
    match name.to_lowercase().as_str() {
        "resize" => {
            for kv in split_top_level(raw, ',') {
                if let Some((k, v)) = kv.split_once(':') {
                    push_dimension(out, k.trim(), v.trim());
                }
            }
        }
        "aspectcrop" => {
            let mut hr = None;
            let mut vr = None;
            for kv in split_top_level(raw, ',') {
                if let Some((k, v)) = kv.split_once(':') {
                    match k.trim().to_lowercase().as_str() {
                        "hr" | "width" => hr = Some(v.trim().to_string()),
                        "vr" | "height" => vr = Some(v.trim().to_string()),
                        _ => {}
                    }
                }
            }
            if let (Some(hr), Some(vr)) = (hr, vr) {
                out.push(TransformParameter::new(
                    "aspect",
                    ParamValue::Text(format!("{}:{}", hr, vr)),
                    ParamSource::Akamai,
                    priority::NAMED_TRANSFORM,
                ));
            }
        }
        "crop" => out.push(TransformParameter::new(
            "fit",
            ParamValue::Text("cover".into()),
            ParamSource::Akamai,
            priority::POLICY_DERIVED,
        )),
        "blur" => push_scalar(out, "blur", Some(raw)),
        "rotate" => push_scalar(out, "rotate", Some(raw)),
        "composite" | "watermark" => {
            composite.active = true;
            for kv in split_top_level(raw, ',') {
                if let Some((k, v)) = kv.split_once(':') {
                    match k.trim().to_lowercase().as_str() {
                        "url" => composite.url = Some(v.trim().to_string()),
                        "placement" => composite.placement = Some(v.trim().to_string()),
                        "dx" => composite.dx = v.trim().parse().ok(),
                        "dy" => composite.dy = v.trim().parse().ok(),
                        "opacity" => composite.opacity = v.trim().parse().ok(),
                        "width" => composite.width = v.trim().parse().ok(),
                        "height" => composite.height = v.trim().parse().ok(),
                        "scale" => composite.scale = v.trim().parse().ok(),
                        _ => {}
                    }
                }
            }
        }
        "facecrop" | "featurecrop" | "smartcrop" => out.push(TransformParameter::new(
            "smart",
            ParamValue::Bool(true),
            ParamSource::Akamai,
            priority::NAMED_TRANSFORM,
        )),
        _ => {}
    }
}

fn push_dimension(out: &mut Vec<TransformParameter>, key: &str, value: &str) {
    if let Ok(n) = value.parse::<f64>() {
        match key.to_lowercase().as_str() {
            "width" => out.push(TransformParameter::new(
                "width",
                ParamValue::Number(n),
                ParamSource::Akamai,
                priority::NAMED_TRANSFORM,
            )),
            "height" => out.push(TransformParameter::new(
                "height",
                ParamValue::Number(n),
                ParamSource::Akamai,
                priority::NAMED_TRANSFORM,
            )),
            _ => {}
        }
    }
}

fn push_scalar(out: &mut Vec<TransformParameter>, name: &str, value: Option<&str>) {
    if let Some(v) = value {
        out.push(TransformParameter::new(
            name,
            ParamValue::Text(v.to_string()),
            ParamSource::Akamai,
            priority::NAMED_TRANSFORM,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn q(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn aspect_crop_with_focal_position() {
        let query = q(&[("im", "AspectCrop=(16,9),xPosition=0.5,yPosition=0.3")]);
        let params = parse(&query);
        let aspect = params.iter().find(|p| p.name == "aspect").unwrap();
        assert_eq!(aspect.value.as_str(), Some("16:9"));
        let focal = params.iter().find(|p| p.name == "focal").unwrap();
        assert_eq!(focal.value.as_str(), Some("0.5,0.3"));
        assert!(params.iter().any(|p| p.name == "ctx"));
    }

    #[test]
    fn composite_watermark_merges_into_single_draw() {
        let query = q(&[(
            "im",
            "Composite,image=(url=https://x/wm.png),placement=southeast,dx=30,dy=40,opacity=0.6,width=120",
        )]);
        let params = parse(&query);
        assert_eq!(params.len(), 1);
        let draw = &params[0];
        assert_eq!(draw.name, "draw");
        let expected = json!([{
            "url": "https://x/wm.png",
            "bottom": 40.0,
            "right": 30.0,
            "width": 120.0,
            "opacity": 0.6
        }]);
        match &draw.value {
            ParamValue::Structured(v) => assert_eq!(v, &expected),
            other => panic!("expected structured draw, got {other:?}"),
        }
    }

    #[test]
    fn dot_notation_resize() {
        let query = q(&[("im.resize", "width:400,height:300")]);
        let params = parse(&query);
        assert!(params.iter().any(|p| p.name == "width" && p.value.as_f64() == Some(400.0)));
        assert!(params.iter().any(|p| p.name == "height" && p.value.as_f64() == Some(300.0)));
    }

    #[test]
    fn impolicy_letterbox_maps_to_pad() {
        let query = q(&[("im", "impolicy=letterbox")]);
        let params = parse(&query);
        let fit = params.iter().find(|p| p.name == "fit").unwrap();
        assert_eq!(fit.value.as_str(), Some("pad"));
    }

    #[test]
    fn can_parse_detects_im_prefix_or_dot_keys() {
        assert!(can_parse(&q(&[("im", "Crop")])));
        assert!(can_parse(&q(&[("im.resize", "width:1")])));
        assert!(!can_parse(&q(&[("w", "1")])));
    }
}
