//! The event/transaction wire schema (spec §3 IssueEvent, §4.3, §4.4).

use crate::message::LogMessage;
use chrono::{DateTime, Utc};
use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueEventType {
    Error,
    Default,
    Csp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Fatal,
    Error,
    Warning,
    Info,
    Debug,
}

impl Default for Level {
    fn default() -> Self {
        Level::Error
    }
}

/// A field-level recoverable validation failure (spec §4.3, §7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub name: String,
    pub value: String,
}

impl EventError {
    pub fn datetime_parse(name: &str, value: impl Into<String>) -> Self {
        Self {
            error_type: "datetime_from_date_parsing".into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stack frames / exceptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StackFrame {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub abs_path: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default)]
    pub colno: Option<u32>,
    #[serde(default)]
    pub context_line: Option<String>,
    #[serde(default)]
    pub pre_context: Vec<String>,
    #[serde(default)]
    pub post_context: Vec<String>,
    #[serde(default)]
    pub in_app: Option<bool>,
}

impl StackFrame {
    /// Basename used for search-vector construction and source-map lookup.
    pub fn basename(&self) -> Option<&str> {
        self.filename
            .as_deref()
            .or(self.abs_path.as_deref())
            .map(|p| p.rsplit('/').next().unwrap_or(p))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stacktrace {
    #[serde(default)]
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionValue {
    #[serde(rename = "type", default)]
    pub exc_type: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub stacktrace: Option<Stacktrace>,
    #[serde(default)]
    pub raw_stacktrace: Option<Stacktrace>,
}

/// `exception` accepts either a bare list (legacy) or `{values: [...]}`
/// (spec §4.3 "legacy list form promoted to `{values: [...]}`").
#[derive(Debug, Clone, Default)]
pub struct ExceptionList(pub Vec<ExceptionValue>);

impl Serialize for ExceptionList {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ExceptionList", 1)?;
        s.serialize_field("values", &self.0)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for ExceptionList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ExceptionListVisitor;

        impl<'de> Visitor<'de> for ExceptionListVisitor {
            type Value = ExceptionList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an exception list or {values: [...]}")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut values = Vec::new();
                while let Some(v) = seq.next_element()? {
                    values.push(v);
                }
                Ok(ExceptionList(values))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut values = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    if key == "values" {
                        values = map.next_value()?;
                    } else {
                        let _: serde::de::IgnoredAny = map.next_value()?;
                    }
                }
                Ok(ExceptionList(values))
            }
        }

        deserializer.deserialize_any(ExceptionListVisitor)
    }
}

impl ExceptionList {
    pub fn last(&self) -> Option<&ExceptionValue> {
        self.0.last()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// debug_meta (source-map symbolication, spec §4.4)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapImage {
    pub debug_id: Uuid,
    #[serde(default)]
    pub code_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DebugImage {
    Sourcemap(SourceMapImage),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DebugMeta {
    #[serde(default)]
    pub images: Vec<DebugImage>,
}

impl DebugMeta {
    pub fn sourcemap_images(&self) -> impl Iterator<Item = &SourceMapImage> {
        self.images.iter().filter_map(|img| match img {
            DebugImage::Sourcemap(s) => Some(s),
            DebugImage::Other => None,
        })
    }
}

// ---------------------------------------------------------------------------
// CSP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CspReport {
    pub effective_directive: String,
    pub blocked_uri: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// The ingest event itself
// ---------------------------------------------------------------------------

/// The lenient wire schema for `event` items. Fields that need coercion
/// logic live as typed fields with custom codecs above; the remainder are
/// kept as opaque JSON per spec §9 ("unknown variants preserved as opaque
/// map fields rather than rejected").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestIssueEvent {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub level: Option<Level>,
    #[serde(default)]
    pub logger: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub message: Option<LogMessage>,
    #[serde(default)]
    pub logentry: Option<LogMessage>,
    #[serde(default)]
    pub exception: Option<ExceptionList>,
    #[serde(default)]
    pub breadcrumbs: Option<serde_json::Value>,
    #[serde(default)]
    pub request: Option<serde_json::Value>,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
    #[serde(default)]
    pub contexts: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
    #[serde(default)]
    pub modules: Option<serde_json::Value>,
    #[serde(default)]
    pub sdk: Option<serde_json::Value>,
    #[serde(default)]
    pub debug_meta: Option<DebugMeta>,
    #[serde(default)]
    pub fingerprint: Option<Vec<String>>,
    #[serde(default)]
    pub csp: Option<CspReport>,
    #[serde(default)]
    pub errors: Vec<EventError>,
}

impl IngestIssueEvent {
    pub fn issue_event_type(&self) -> IssueEventType {
        if self.csp.is_some() {
            IssueEventType::Csp
        } else if self.exception.as_ref().is_some_and(|e| !e.is_empty()) {
            IssueEventType::Error
        } else {
            IssueEventType::Default
        }
    }
}

/// Minimal transaction wire schema (spec §3 TransactionGroup/Event).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEventSchema {
    pub event_id: Uuid,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_timestamp: Option<DateTime<Utc>>,
    pub transaction: String,
    #[serde(default)]
    pub contexts: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
}

impl TransactionEventSchema {
    /// `(op, method)` extracted from `contexts.trace`, used for the group
    /// identity `(project, transaction, op, method)`.
    pub fn trace_op(&self) -> Option<String> {
        self.contexts
            .as_ref()?
            .get("trace")?
            .get("op")?
            .as_str()
            .map(str::to_string)
    }

    pub fn duration_ms(&self) -> Option<f64> {
        let end = self.timestamp?;
        let start = self.start_timestamp?;
        Some((end - start).num_milliseconds() as f64)
    }
}
