//! Loose accessors over provider JSON.
//!
//! Export payloads disagree on key names, nesting, and timestamp encodings,
//! so every accessor takes an ordered list of candidate keys and returns the
//! first usable value.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;

/// First non-empty string (or number rendered as a string) under `keys`.
pub fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// First string under `keys` that is not blank, kept verbatim.
pub fn raw_str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    })
}

/// First array under `keys`.
pub fn array_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_array))
}

/// First non-negative integer under `keys`, accepting numeric strings.
pub fn u64_field(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// First parseable timestamp under `keys`.
pub fn time_field(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(parse_timestamp))
}

/// Parse the timestamp encodings found in chat exports.
///
/// Accepts epoch seconds, epoch milliseconds (values above 10^12), RFC 3339,
/// naive `YYYY-MM-DD HH:MM:SS[.fff]` (taken as UTC), numeric strings, and
/// Mongo-style `{"$date": ...}` wrappers.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => parse_timestamp_str(s),
        Value::Object(map) => map
            .get("$date")
            .or_else(|| map.get("$numberLong"))
            .and_then(parse_timestamp),
        _ => None,
    }
}

fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    raw.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    let millis = if secs > 1e12 { secs } else { secs * 1000.0 };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

/// Flatten a content value into plain text.
///
/// Handles plain strings, arrays of parts, `{"parts": [...]}`,
/// `{"text": ...}` and `{"type": "text", "text": ...}` blocks. Non-text
/// parts contribute nothing.
pub fn text_of(value: &Value) -> String {
    let mut pieces = Vec::new();
    collect_text(value, &mut pieces, 0);
    pieces.join("\n").trim().to_string()
}

fn collect_text(value: &Value, out: &mut Vec<String>, depth: usize) {
    if depth > 8 {
        return;
    }
    match value {
        Value::String(s) => {
            if !s.trim().is_empty() {
                out.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, out, depth + 1);
            }
        }
        Value::Object(map) => {
            if let Some(kind) = map.get("type").and_then(Value::as_str) {
                if kind != "text" && !map.contains_key("text") {
                    return;
                }
            }
            for key in ["parts", "text", "content", "value"] {
                if let Some(inner) = map.get(key) {
                    collect_text(inner, out, depth + 1);
                    return;
                }
            }
        }
        _ => {}
    }
}

fn tag_re() -> &'static Regex {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    TAG_RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"))
}

fn break_re() -> &'static Regex {
    static BREAK_RE: OnceLock<Regex> = OnceLock::new();
    BREAK_RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</p>|</li>|</h[1-6]>").expect("valid break regex")
    })
}

/// Reduce an HTML fragment to readable text.
pub fn strip_html(html: &str) -> String {
    let with_breaks = break_re().replace_all(html, "\n");
    let stripped = tag_re().replace_all(&with_breaks, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_in_all_encodings() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp(&json!(1704164645)), Some(expected));
        assert_eq!(parse_timestamp(&json!(1704164645.0)), Some(expected));
        assert_eq!(parse_timestamp(&json!(1704164645000_i64)), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-02T03:04:05Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-02T04:04:05+01:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-02 03:04:05")), Some(expected));
        assert_eq!(
            parse_timestamp(&json!({"$date": {"$numberLong": "1704164645000"}})),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!("not a date")), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
    }

    #[test]
    fn text_from_parts_and_blocks() {
        assert_eq!(text_of(&json!({"parts": ["a", "b"]})), "a\nb");
        assert_eq!(
            text_of(&json!([{"type": "text", "text": "hello"}, {"type": "image", "url": "x"}])),
            "hello"
        );
        assert_eq!(text_of(&json!("  plain ")), "plain");
        assert_eq!(text_of(&json!(null)), "");
    }

    #[test]
    fn keys_are_tried_in_order() {
        let v = json!({"b": "second", "c": "", "a": 7});
        assert_eq!(str_field(&v, &["c", "b", "a"]).as_deref(), Some("second"));
        assert_eq!(str_field(&v, &["a"]).as_deref(), Some("7"));
        assert_eq!(u64_field(&json!({"size": "42"}), &["size"]), Some(42));
    }

    #[test]
    fn html_is_stripped() {
        assert_eq!(
            strip_html("<p>Hello &amp; <b>welcome</b></p><p>Bye</p>"),
            "Hello & welcome\nBye"
        );
    }
}
