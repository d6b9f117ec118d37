use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// IssueStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Unresolved,
    Resolved,
    Ignored,
}

impl IssueStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// `unresolved -> resolved -> unresolved -> ... -> (is_deleted) -> purged`;
    /// purge is modeled separately via `Issue::is_deleted`, not as a status.
    pub fn can_transition_to(&self, target: IssueStatus) -> bool {
        matches!(
            (self, target),
            (IssueStatus::Unresolved, IssueStatus::Resolved)
                | (IssueStatus::Unresolved, IssueStatus::Ignored)
                | (IssueStatus::Resolved, IssueStatus::Unresolved)
                | (IssueStatus::Ignored, IssueStatus::Unresolved)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueEventKind {
    Error,
    Default,
    Csp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Fatal,
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Email,
    SlackWebhook,
    Discord,
    GoogleChat,
}

// ---------------------------------------------------------------------------
// Organization / Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub slug: String,
    pub is_accepting_events: bool,
    /// 0-100. Applies on top of each project's own throttle (max of the two wins).
    pub throttle_pct: u8,
    pub scrub_ip_addresses: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsnKey {
    pub public_key: Uuid,
    pub project_id: i64,
    pub rate_limit_window_secs: Option<u32>,
    pub rate_limit_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub slug: String,
    pub organization_id: i64,
    pub scrub_ip_addresses: bool,
    /// 0-100.
    pub throttle_pct: u8,
    pub first_event: Option<DateTime<Utc>>,
}

impl Project {
    /// Effective scrub flag is the logical OR of project and organization flags.
    pub fn effective_scrub_ip(&self, org: &Organization) -> bool {
        self.scrub_ip_addresses || org.scrub_ip_addresses
    }
}

// ---------------------------------------------------------------------------
// IssueEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueEvent {
    pub event_id: Uuid,
    pub received: DateTime<Utc>,
    pub project_id: i64,
    pub issue_id: Option<i64>,
    pub event_type: IssueEventKind,
    pub level: EventLevel,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub transaction: Option<String>,
    pub culprit: Option<String>,
    pub tags: Vec<(String, String)>,
    pub data: serde_json::Value,
    pub hashes: Vec<String>,
    pub release_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Issue / IssueHash
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub short_id: i64,
    pub project_id: i64,
    pub event_type: IssueEventKind,
    pub title: String,
    pub metadata: serde_json::Value,
    pub level: EventLevel,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: i64,
    pub status: IssueStatus,
    pub search_vector: String,
    pub is_deleted: bool,
}

impl Issue {
    /// An issue reopens on any new event while it is `resolved`; `ignored`
    /// issues stay ignored until a user acts (see spec §4.9).
    pub fn should_reopen_on_new_event(&self) -> bool {
        self.status == IssueStatus::Resolved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueHash {
    pub project_id: i64,
    pub hash: String,
    pub issue_id: i64,
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagKey {
    pub id: i64,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagValue {
    pub id: i64,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTag {
    pub date: chrono::NaiveDate,
    pub issue_id: i64,
    pub key_id: i64,
    pub value_id: i64,
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Statistics / aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectHourlyStatistic {
    pub project_id: i64,
    pub date: chrono::NaiveDate,
    pub hour: u8,
    pub times_seen: i64,
    pub transaction_times_seen: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueAggregate {
    pub organization_id: i64,
    pub issue_id: i64,
    pub date: chrono::NaiveDate,
    pub hour: u8,
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionGroup {
    pub id: i64,
    pub project_id: i64,
    pub transaction: String,
    pub op: String,
    pub method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub event_id: Uuid,
    pub received: DateTime<Utc>,
    pub group_id: i64,
    pub project_id: i64,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionGroupAggregate {
    pub organization_id: i64,
    pub group_id: i64,
    pub minute: DateTime<Utc>,
    pub count: i64,
    pub total_duration_ms: f64,
    pub sum_of_squares_duration_ms: f64,
}

// ---------------------------------------------------------------------------
// Releases / debug symbol bundles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: i64,
    pub organization_id: i64,
    pub version: String,
    pub project_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DebugSymbolKey {
    DebugId(Uuid),
    ReleaseFile { release_id: i64, file_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSymbolBundle {
    pub id: i64,
    pub organization_id: i64,
    pub key: DebugSymbolKey,
    pub minified_file: String,
    pub source_map_file: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

impl DebugSymbolBundle {
    /// Last-used is refreshed at most once per day (spec §3, §4.4).
    pub fn needs_last_used_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.last_used {
            None => true,
            Some(t) => now - t >= chrono::Duration::hours(24),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts / notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecipient {
    pub kind: RecipientKind,
    pub url: String,
    pub tags_to_add: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub project_id: i64,
    pub timespan_minutes: i64,
    pub quantity_threshold: i64,
    pub uptime: bool,
    pub recipients: Vec<AlertRecipient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub alert_rule_id: i64,
    pub issue_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub dispatched: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_status_transitions() {
        assert!(IssueStatus::Unresolved.can_transition_to(IssueStatus::Resolved));
        assert!(IssueStatus::Resolved.can_transition_to(IssueStatus::Unresolved));
        assert!(!IssueStatus::Resolved.can_transition_to(IssueStatus::Ignored));
    }

    #[test]
    fn reopen_only_from_resolved() {
        let mut issue = sample_issue();
        issue.status = IssueStatus::Resolved;
        assert!(issue.should_reopen_on_new_event());
        issue.status = IssueStatus::Ignored;
        assert!(!issue.should_reopen_on_new_event());
        issue.status = IssueStatus::Unresolved;
        assert!(!issue.should_reopen_on_new_event());
    }

    #[test]
    fn bundle_refresh_window_is_24h() {
        let mut bundle = sample_bundle();
        let now = Utc::now();
        bundle.last_used = Some(now - chrono::Duration::hours(23));
        assert!(!bundle.needs_last_used_refresh(now));
        bundle.last_used = Some(now - chrono::Duration::hours(25));
        assert!(bundle.needs_last_used_refresh(now));
        bundle.last_used = None;
        assert!(bundle.needs_last_used_refresh(now));
    }

    fn sample_issue() -> Issue {
        Issue {
            id: 1,
            short_id: 1,
            project_id: 1,
            event_type: IssueEventKind::Error,
            title: "boom".into(),
            metadata: serde_json::json!({}),
            level: EventLevel::Error,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            count: 1,
            status: IssueStatus::Unresolved,
            search_vector: String::new(),
            is_deleted: false,
        }
    }

    fn sample_bundle() -> DebugSymbolBundle {
        DebugSymbolBundle {
            id: 1,
            organization_id: 1,
            key: DebugSymbolKey::DebugId(Uuid::nil()),
            minified_file: "app.min.js".into(),
            source_map_file: Some("app.min.js.map".into()),
            last_used: None,
        }
    }
}
