//! Envelope/item framing types (spec §4.1, §6.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// First line of an envelope: `<envelope-header JSON>\n`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub sdk: Option<serde_json::Value>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

/// One item header: `<item-header JSON>\n`, preceding the item payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemHeader {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Item types that are fully validated, grouped, and persisted.
pub const SUPPORTED_ITEMS: &[&str] = &["event", "transaction"];

/// Item types that are accepted on the wire but skipped by byte length —
/// listed here so callers can distinguish "known but ignored" from
/// "genuinely unknown" for logging purposes; both are handled identically.
pub const IGNORED_ITEMS: &[&str] = &[
    "log",
    "session",
    "client_report",
    "attachment",
    "user_report",
    "check_in",
    "profile",
    "replay_event",
    "replay_recording",
    "span",
];

impl ItemHeader {
    pub fn is_supported(&self) -> bool {
        SUPPORTED_ITEMS.contains(&self.item_type.as_str())
    }
}
