//! Normalization for the `request.headers` and `request.query_string`
//! lenient shapes (spec §4.3): accepted as list-of-pairs, map-of-str, or
//! map-of-list; normalized to a sorted `Vec<(key, value)>`.

use serde_json::Value;

const MAX_FIELD_CHARS: usize = 200;

/// Normalize a headers value, dropping `Cookie` entries and empty pairs.
pub fn normalize_headers(value: &Value) -> Vec<(String, String)> {
    let mut pairs = normalize_pairs(value);
    pairs.retain(|(k, v)| !k.eq_ignore_ascii_case("cookie") && !k.is_empty() && !v.is_empty());
    pairs.sort();
    pairs.dedup();
    pairs
}

/// Normalize a querystring value (raw string, list-of-pairs, or map).
pub fn normalize_querystring(value: &Value) -> Vec<(String, String)> {
    if let Value::String(s) = value {
        let mut pairs: Vec<(String, String)> = s
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (part.to_string(), String::new()),
            })
            .collect();
        pairs.sort();
        return pairs;
    }
    let mut pairs = normalize_pairs(value);
    pairs.sort();
    pairs
}

fn normalize_pairs(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Array(pair) if pair.len() == 2 => {
                    Some((scalar_to_string(&pair[0]), scalar_to_string(&pair[1])))
                }
                _ => None,
            })
            .map(truncate_pair)
            .collect(),
        Value::Object(map) => map
            .iter()
            .flat_map(|(k, v)| match v {
                Value::Array(values) => values
                    .iter()
                    .map(|item| (k.clone(), scalar_to_string(item)))
                    .collect::<Vec<_>>(),
                other => vec![(k.clone(), scalar_to_string(other))],
            })
            .map(truncate_pair)
            .collect(),
        _ => Vec::new(),
    }
}

fn truncate_pair((k, v): (String, String)) -> (String, String) {
    (
        crate::message::truncate_chars(&k, MAX_FIELD_CHARS),
        crate::message::truncate_chars(&v, MAX_FIELD_CHARS),
    )
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Strip embedded NUL characters from every string leaf in a JSON value
/// (spec §4.3 "cheap sanitization"; scenario 6).
pub fn strip_nul_recursive(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains('\u{0000}') {
                *s = s.replace('\u{0000}', "");
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nul_recursive),
        Value::Object(map) => {
            let keys_with_nul: Vec<String> = map
                .keys()
                .filter(|k| k.contains('\u{0000}'))
                .cloned()
                .collect();
            for key in keys_with_nul {
                if let Some(v) = map.remove(&key) {
                    map.insert(key.replace('\u{0000}', ""), v);
                }
            }
            for v in map.values_mut() {
                strip_nul_recursive(v);
            }
        }
        _ => {}
    }
}
