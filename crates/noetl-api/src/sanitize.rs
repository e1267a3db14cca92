// Defense-in-depth redaction at the `POST /api/events` ingest boundary
// (spec.md §4.8: a tool adapter "must never return secret bytes in
// outcome.result" -- this is the belt to that braces, in case an
// adapter slips up or an external worker submits raw data).

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const REDACTED: &str = "[redacted]";

fn sensitive_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)token|password|secret|api_key|authorization").expect("static pattern is valid")
    })
}

/// Walks `value` in place, blanking any object value whose key matches
/// the sensitive-key pattern.
pub fn redact_sensitive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if sensitive_key_pattern().is_match(key) {
                    *v = Value::String(REDACTED.to_string());
                } else {
                    redact_sensitive(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_sensitive(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_top_level_keys() {
        let mut v = json!({"api_key": "sk-live-123", "note": "fine"});
        redact_sensitive(&mut v);
        assert_eq!(v["api_key"], json!("[redacted]"));
        assert_eq!(v["note"], json!("fine"));
    }

    #[test]
    fn redacts_nested_and_case_insensitive_keys() {
        let mut v = json!({"ctx": {"Authorization": "Bearer xyz", "url": "https://x"}});
        redact_sensitive(&mut v);
        assert_eq!(v["ctx"]["Authorization"], json!("[redacted]"));
        assert_eq!(v["ctx"]["url"], json!("https://x"));
    }

    #[test]
    fn leaves_arrays_of_scalars_untouched() {
        let mut v = json!({"values": [1, 2, 3]});
        redact_sensitive(&mut v);
        assert_eq!(v["values"], json!([1, 2, 3]));
    }
}
