//! The interchange message handed from the network tier to the batch tier
//! (spec §5): a validated event/transaction plus routing metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which schema `payload` deserializes as — the batch tier needs this to
/// route without re-sniffing the JSON (spec §5 "interchange message").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    IssueEvent,
    Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestTaskMessage {
    pub project_id: i64,
    pub organization_id: i64,
    pub event_id: Uuid,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    pub received: DateTime<Utc>,
}
