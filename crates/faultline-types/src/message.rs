//! The `message` / `logentry` lenient shape (spec §4.3): either a bare
//! string, `{formatted}`, or `{message, params}` where `params` is an
//! ordered list (C-style `%s` interpolation) or a map (brace interpolation).

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_MESSAGE_CHARS: usize = 8192;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageParams {
    List(Vec<serde_json::Value>),
    Map(serde_json::Map<String, serde_json::Value>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogMessage {
    pub formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<MessageParams>,
}

impl LogMessage {
    pub fn plain(formatted: impl Into<String>) -> Self {
        let formatted = truncate_chars(&formatted.into(), MAX_MESSAGE_CHARS);
        Self {
            formatted,
            message: None,
            params: None,
        }
    }
}

impl<'de> Deserialize<'de> for LogMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MessageVisitor;

        impl<'de> Visitor<'de> for MessageVisitor {
            type Value = LogMessage;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or a {message|formatted, params} object")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(LogMessage::plain(v))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(LogMessage::plain(v))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut formatted: Option<String> = None;
                let mut message: Option<String> = None;
                let mut params: Option<MessageParams> = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "formatted" => formatted = map.next_value()?,
                        "message" => message = map.next_value()?,
                        "params" => params = map.next_value()?,
                        _ => {
                            let _: serde::de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                // Mirrors `transform_parameterized_message`: an explicit
                // `formatted` wins outright; otherwise a `message` template
                // is interpolated against `params` when present.
                let base = match (&formatted, &message, &params) {
                    (Some(f), ..) => f.clone(),
                    (None, Some(msg), Some(p)) => interpolate(msg, p),
                    (None, Some(msg), None) => msg.clone(),
                    (None, None, _) => String::new(),
                };
                Ok(LogMessage {
                    formatted: truncate_chars(&base, MAX_MESSAGE_CHARS),
                    message,
                    params,
                })
            }
        }

        deserializer.deserialize_any(MessageVisitor)
    }
}

/// Interpolate `params` into `formatted`, used by the title/message
/// derivation in the grouping engine (spec §4.5 `transform_parameterized_message`).
pub fn interpolate(formatted: &str, params: &MessageParams) -> String {
    match params {
        MessageParams::List(values) => {
            let mut out = String::with_capacity(formatted.len());
            let mut values = values.iter();
            let mut chars = formatted.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '%' && chars.peek() == Some(&'s') {
                    chars.next();
                    if let Some(v) = values.next() {
                        out.push_str(&value_to_display(v));
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        MessageParams::Map(map) => {
            let mut out = formatted.to_string();
            for (k, v) in map {
                out = out.replace(&format!("{{{{{}}}}}", k), &value_to_display(v));
                out = out.replace(&format!("{{{}}}", k), &value_to_display(v));
            }
            out
        }
    }
}

fn value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate a string to at most `max_chars` Unicode scalar values.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_message() {
        let m: LogMessage = serde_json::from_str("\"hello world\"").unwrap();
        assert_eq!(m.formatted, "hello world");
        assert!(m.params.is_none());
    }

    #[test]
    fn formatted_object_message() {
        let m: LogMessage =
            serde_json::from_str(r#"{"formatted": "hi there", "message": "hi %s"}"#).unwrap();
        assert_eq!(m.formatted, "hi there");
        assert_eq!(m.message.as_deref(), Some("hi %s"));
    }

    #[test]
    fn list_params_message() {
        let m: LogMessage =
            serde_json::from_str(r#"{"message": "hi %s", "params": ["bob"]}"#).unwrap();
        assert_eq!(m.formatted, "hi bob");
        match m.params.unwrap() {
            MessageParams::List(v) => assert_eq!(v, vec![serde_json::json!("bob")]),
            _ => panic!("expected list params"),
        }
    }

    #[test]
    fn missing_formatted_interpolates_from_message_and_params() {
        let m: LogMessage =
            serde_json::from_str(r#"{"message": "User %s logged in", "params": ["bob"]}"#)
                .unwrap();
        assert_eq!(m.formatted, "User bob logged in");
    }

    #[test]
    fn truncates_long_message() {
        let long = "a".repeat(MAX_MESSAGE_CHARS + 100);
        let m = LogMessage::plain(long);
        assert_eq!(m.formatted.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn interpolate_percent_s() {
        let params = MessageParams::List(vec![serde_json::json!("world")]);
        assert_eq!(interpolate("hello %s", &params), "hello world");
    }

    #[test]
    fn interpolate_brace_map() {
        let mut map = serde_json::Map::new();
        map.insert("name".into(), serde_json::json!("world"));
        let params = MessageParams::Map(map);
        assert_eq!(interpolate("hello {{name}}", &params), "hello world");
    }
}
