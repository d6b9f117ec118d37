//! Validator/Normalizer (spec §4.3): timestamp coercion, contexts/tags
//! derivation from the request's `User-Agent`, and the recoverable
//! field-error bookkeeping shared by every event kind.
//!
//! Grounded in `process_event.py::generate_contexts`/`generate_tags` for the
//! derivation order and in `faultline_types::headers`/`message` for the
//! coercion primitives already shared with the ingest-side wire schema.

use chrono::{DateTime, TimeZone, Utc};
use faultline_types::headers::strip_nul_recursive;
use faultline_types::{EventError, IngestIssueEvent};
use serde_json::Value;

const MAX_TAG_CHARS: usize = 200;

/// Coerce the lenient `timestamp` field to a concrete instant. Accepts an
/// RFC 3339 string or an epoch-seconds number; anything else falls back to
/// `now` and records an error (spec §4.3 "invalid -> set to server now").
pub fn normalize_timestamp(value: Option<&Value>, now: DateTime<Utc>, errors: &mut Vec<EventError>) -> DateTime<Utc> {
    match value {
        Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => {
                errors.push(EventError::datetime_parse("timestamp", s.clone()));
                now
            }
        },
        Some(Value::Number(n)) => {
            if let Some(secs) = n.as_f64() {
                let nanos = (secs.fract() * 1_000_000_000.0).round() as u32;
                match Utc.timestamp_opt(secs.trunc() as i64, nanos) {
                    chrono::LocalResult::Single(dt) => dt,
                    _ => {
                        errors.push(EventError::datetime_parse("timestamp", n.to_string()));
                        now
                    }
                }
            } else {
                errors.push(EventError::datetime_parse("timestamp", n.to_string()));
                now
            }
        }
        Some(other) => {
            errors.push(EventError::datetime_parse("timestamp", other.to_string()));
            now
        }
        None => now,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowserContext {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsContext {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct DerivedContexts {
    pub browser: Option<BrowserContext>,
    pub os: Option<OsContext>,
    pub device_model: Option<String>,
}

/// Populate `browser`/`os`/`device` from the request's `User-Agent` header,
/// unless the event already set them (spec §4.3 "Contexts derivation").
///
/// This is a reduced family/version heuristic, not a full UA database — the
/// pack carries no user-agent-parsing crate, so this mirrors only the
/// handful of families the tag-derivation step actually needs.
pub fn generate_contexts(event: &IngestIssueEvent) -> DerivedContexts {
    let mut derived = DerivedContexts::default();
    let has_context = |key: &str| event.contexts.as_ref().is_some_and(|c| c.contains_key(key));

    let ua_string = event.request.as_ref().and_then(find_user_agent_header);
    let Some(ua) = ua_string else {
        return derived;
    };

    if !has_context("browser") {
        derived.browser = Some(parse_browser(&ua));
    }
    if !has_context("os") {
        derived.os = Some(parse_os(&ua));
    }
    if !has_context("device") {
        derived.device_model = parse_device_model(&ua);
    }
    derived
}

fn find_user_agent_header(request: &Value) -> Option<String> {
    let headers = request.get("headers")?;
    let pairs = faultline_types::headers::normalize_headers(headers);
    pairs
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
        .map(|(_, v)| v)
}

fn parse_browser(ua: &str) -> BrowserContext {
    const FAMILIES: &[&str] = &["Edg", "OPR", "Chrome", "Firefox", "Safari", "MSIE", "Trident"];
    for family in FAMILIES {
        if let Some(idx) = ua.find(family) {
            let rest = &ua[idx + family.len()..];
            let version = rest
                .trim_start_matches(['/', ' '])
                .split(|c: char| c == ' ' || c == ';')
                .next()
                .unwrap_or("")
                .to_string();
            let name = match *family {
                "Edg" => "Edge",
                "OPR" => "Opera",
                "MSIE" | "Trident" => "Internet Explorer",
                other => other,
            };
            return BrowserContext {
                name: name.to_string(),
                version,
            };
        }
    }
    BrowserContext {
        name: "Other".to_string(),
        version: String::new(),
    }
}

fn parse_os(ua: &str) -> OsContext {
    let name = if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Mac OS X") || ua.contains("macOS") {
        "Mac OS X"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
        "iOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Other"
    };
    OsContext {
        name: name.to_string(),
    }
}

fn parse_device_model(ua: &str) -> Option<String> {
    if ua.contains("iPhone") {
        Some("iPhone".to_string())
    } else if ua.contains("iPad") {
        Some("iPad".to_string())
    } else {
        None
    }
}

/// Flatten SDK tags with derived browser/os/device/user/environment/release
/// tags into one map, truncating keys and values to 200 chars and dropping
/// empties (spec §4.3 "Tags derivation").
pub fn generate_tags(
    event: &IngestIssueEvent,
    contexts: &DerivedContexts,
) -> Vec<(String, String)> {
    let mut tags: Vec<(String, String)> = match &event.tags {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Array(pair) if pair.len() == 2 => {
                    Some((scalar_to_string(&pair[0]), scalar_to_string(&pair[1])))
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    if let Some(browser) = &contexts.browser {
        tags.push(("browser.name".to_string(), browser.name.clone()));
        tags.push((
            "browser".to_string(),
            format!("{} {}", browser.name, browser.version).trim().to_string(),
        ));
    }
    if let Some(os) = &contexts.os {
        tags.push(("os.name".to_string(), os.name.clone()));
    }
    if let Some(model) = &contexts.device_model {
        tags.push(("device".to_string(), model.clone()));
    }

    if let Some(Value::Object(user)) = &event.user {
        for key in ["id", "email", "username"] {
            if let Some(v) = user.get(key).and_then(Value::as_str) {
                tags.push((format!("user.{key}"), v.to_string()));
            }
        }
    }
    if let Some(env) = &event.environment {
        tags.push(("environment".to_string(), env.clone()));
    }
    if let Some(release) = &event.release {
        tags.push(("release".to_string(), release.clone()));
    }
    if let Some(server_name) = &event.server_name {
        tags.push(("server_name".to_string(), server_name.clone()));
    }

    tags.into_iter()
        .map(|(k, v)| {
            (
                faultline_types::truncate_chars(&k, MAX_TAG_CHARS),
                faultline_types::truncate_chars(&v, MAX_TAG_CHARS),
            )
        })
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Strip embedded NULs from every string in the raw payload before it is
/// handed to the grouping stage (spec §4.3 "Cheap sanitization").
pub fn sanitize_payload(payload: &mut Value) {
    strip_nul_recursive(payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn rfc3339_timestamp_parses() {
        let mut errors = Vec::new();
        let now = Utc::now();
        let value = Value::String("2024-01-01T00:00:00Z".to_string());
        let ts = normalize_timestamp(Some(&value), now, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn epoch_seconds_timestamp_parses() {
        let mut errors = Vec::new();
        let now = Utc::now();
        let ts = normalize_timestamp(Some(&Value::from(1700000000)), now, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(ts.timestamp(), 1700000000);
    }

    #[test]
    fn invalid_timestamp_falls_back_to_now_with_error() {
        let mut errors = Vec::new();
        let now = Utc::now();
        let ts = normalize_timestamp(Some(&Value::String("not-a-date".to_string())), now, &mut errors);
        assert_eq!(ts, now);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "datetime_from_date_parsing");
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let mut errors = Vec::new();
        let now = Utc::now();
        let ts = normalize_timestamp(None, now, &mut errors);
        assert_eq!(ts, now);
        assert!(errors.is_empty());
        let _ = Duration::seconds(0);
    }

    #[test]
    fn contexts_derived_from_chrome_user_agent() {
        let event = IngestIssueEvent {
            request: Some(serde_json::json!({
                "headers": [["User-Agent", "Mozilla/5.0 (Windows NT 10.0) Chrome/120.0.0.0 Safari/537.36"]]
            })),
            ..Default::default()
        };
        let contexts = generate_contexts(&event);
        assert_eq!(contexts.browser.unwrap().name, "Chrome");
        assert_eq!(contexts.os.unwrap().name, "Windows");
    }

    #[test]
    fn tags_merge_sdk_and_derived_dropping_empties() {
        let mut event = IngestIssueEvent {
            environment: Some("production".to_string()),
            ..Default::default()
        };
        event.tags = Some(serde_json::json!({"custom": "value", "blank": ""}));
        let contexts = DerivedContexts::default();
        let tags = generate_tags(&event, &contexts);
        assert!(tags.contains(&("environment".to_string(), "production".to_string())));
        assert!(tags.contains(&("custom".to_string(), "value".to_string())));
        assert!(!tags.iter().any(|(k, _)| k == "blank"));
    }
}
