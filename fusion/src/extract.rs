//! Layered structured-data extraction from free-form model output.
//!
//! Text-generation responses are never trusted to be clean JSON. Every
//! response goes through the same ladder:
//!
//! ```text
//! ```json fenced block ──► any fenced block ──► last balanced {...} ──► direct parse
//!          │                      │                     │                    │
//!          └──────────── first object that parses wins ─┴────────────────────┘
//!                                                       none → empty map
//! ```
//!
//! An empty map is the "no result" signal: callers check for the fields
//! they need and fall back when they are missing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::distribution::Distribution;

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(.*?)```").expect("JSON_FENCE_RE regex should compile")
});

static ANY_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.*?)```").expect("ANY_FENCE_RE regex should compile"));

/// Coerce a free-text response into a JSON object.
///
/// Returns an empty map when no strategy yields an object.
pub fn extract_structured(text: &str) -> Map<String, Value> {
    let text = text.trim();

    if let Some(obj) = JSON_FENCE_RE
        .captures_iter(text)
        .find_map(|caps| parse_object(caps.get(1).map_or("", |m| m.as_str())))
    {
        return obj;
    }

    if let Some(obj) = ANY_FENCE_RE.captures_iter(text).find_map(|caps| {
        let body = caps.get(1).map_or("", |m| m.as_str()).trim();
        parse_object(body.strip_prefix("json").unwrap_or(body))
    }) {
        return obj;
    }

    if let Some(obj) = balanced_objects(text)
        .into_iter()
        .rev()
        .find_map(|(start, end)| parse_object(&text[start..end]))
    {
        return obj;
    }

    parse_object(text).unwrap_or_default()
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Byte spans of every top-level balanced `{...}` region, in order.
///
/// Braces inside string literals are ignored once a region is open.
fn balanced_objects(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if depth > 0 && in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = idx;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, idx + 1));
                }
            }
            _ => {}
        }
    }

    spans
}

/// Read a finite number, accepting numeric strings.
pub fn f64_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match map.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Read a non-empty string field.
pub fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read an array of strings, skipping non-string entries.
pub fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Read an `{outcome: probability}` object, keeping finite non-negative entries.
pub fn probability_map(map: &Map<String, Value>, key: &str) -> Distribution {
    map.get(key)
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(name, v)| {
                    let p = match v {
                        Value::Number(n) => n.as_f64()?,
                        Value::String(s) => s.trim().parse::<f64>().ok()?,
                        _ => return None,
                    };
                    (p.is_finite() && p >= 0.0).then(|| (name.clone(), p))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json() {
        let obj = extract_structured(r#"{"key": "value"}"#);
        assert_eq!(Value::Object(obj), json!({"key": "value"}));
    }

    #[test]
    fn json_fenced_block_wins() {
        let text = "Some text\n```json\n{\"key\": \"value\"}\n```\nMore text {\"other\": 1}";
        let obj = extract_structured(text);
        assert_eq!(Value::Object(obj), json!({"key": "value"}));
    }

    #[test]
    fn untagged_fence() {
        let text = "Here:\n```\n{\"score\": 0.4}\n```";
        let obj = extract_structured(text);
        assert_eq!(f64_field(&obj, "score"), Some(0.4));
    }

    #[test]
    fn last_balanced_block() {
        let text = r#"Lots of text here {"nested": true} and more"#;
        let obj = extract_structured(text);
        assert_eq!(Value::Object(obj), json!({"nested": true}));
    }

    #[test]
    fn balanced_scan_handles_nesting_and_braces_in_strings() {
        let text = r#"first {"a": 1} then {"b": {"c": "x}y"}} trailing"#;
        let obj = extract_structured(text);
        assert_eq!(Value::Object(obj), json!({"b": {"c": "x}y"}}));
    }

    #[test]
    fn falls_back_to_earlier_block_when_last_is_not_json() {
        let text = r#"{"ok": 1} and then {not json}"#;
        let obj = extract_structured(text);
        assert_eq!(Value::Object(obj), json!({"ok": 1}));
    }

    #[test]
    fn arrays_are_not_objects() {
        assert!(extract_structured("[1, 2, 3]").is_empty());
    }

    #[test]
    fn invalid_returns_empty() {
        assert!(extract_structured("no json here at all").is_empty());
        assert!(extract_structured("").is_empty());
    }

    #[test]
    fn field_helpers() {
        let obj = extract_structured(
            r#"{"p": {"A": 0.6, "B": "0.4", "C": -1, "D": "x"}, "s": ["a", 2, "b"], "n": "0.7", "t": "  "}"#,
        );
        let probs = probability_map(&obj, "p");
        assert_eq!(probs.len(), 2);
        assert_eq!(probs["B"], 0.4);
        assert_eq!(string_list(&obj, "s"), vec!["a", "b"]);
        assert_eq!(f64_field(&obj, "n"), Some(0.7));
        assert_eq!(string_field(&obj, "t"), None);
        assert!(probability_map(&obj, "missing").is_empty());
    }
}
