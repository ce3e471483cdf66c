use serde_json::{Map, Value};
use std::collections::HashMap;

/// True when every configured `key=value` filter holds for a symbol listing entry.
///
/// Strings compare exactly, arrays match when any element equals the value,
/// numbers and booleans compare by their JSON text. A missing key never matches.
pub fn matches_filters(entry: &Map<String, Value>, filters: &HashMap<String, String>) -> bool {
    filters
        .iter()
        .all(|(key, wanted)| entry.get(key).is_some_and(|value| value_matches(value, wanted)))
}

fn value_matches(value: &Value, wanted: &str) -> bool {
    match value {
        Value::String(s) => s == wanted,
        Value::Array(items) => items.iter().any(|item| value_matches(item, wanted)),
        Value::Null => false,
        other => other.to_string().eq_ignore_ascii_case(wanted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn filters(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_filter_set_matches_everything() {
        assert!(matches_filters(&entry(json!({"symbol": "BTC-USDT"})), &HashMap::new()));
    }

    #[test]
    fn numbers_and_booleans_compare_by_text() {
        let e = entry(json!({"status": 1, "apiStateSell": true}));
        assert!(matches_filters(&e, &filters(&[("status", "1"), ("apiStateSell", "TRUE")])));
        assert!(!matches_filters(&e, &filters(&[("status", "0")])));
    }

    #[test]
    fn arrays_match_any_element() {
        let e = entry(json!({"tags": ["layer1", "pow"]}));
        assert!(matches_filters(&e, &filters(&[("tags", "pow")])));
        assert!(!matches_filters(&e, &filters(&[("tags", "defi")])));
    }

    #[test]
    fn missing_key_or_null_never_matches() {
        let e = entry(json!({"status": null}));
        assert!(!matches_filters(&e, &filters(&[("status", "null")])));
        assert!(!matches_filters(&e, &filters(&[("absent", "x")])));
    }
}
