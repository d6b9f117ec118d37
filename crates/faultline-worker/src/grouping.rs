//! Fingerprint + Grouping Engine (spec §4.5), grounded in
//! `process_event.py::process_issue_events`/`check_set_issue_id`: derive
//! title/culprit/fingerprint per event, resolve each to an Issue (creating
//! one at most once per hash), accumulate aggregate deltas, and persist the
//! whole batch with the store's already-bulk-shaped methods.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use faultline_core::model::{EventLevel, IssueEventKind, IssueStatus};
use faultline_core::store::{EventStore, IssueBatchUpdate, IssueEventInput, OwnedIssueEvent};
use faultline_types::{CspReport, EventError, ExceptionList, IngestIssueEvent, IssueEventType, Level, Stacktrace};
use uuid::Uuid;

use crate::normalize::{self, DerivedContexts};
use crate::search_vector::{self, SearchVectorInput};

const TITLE_MAX_CHARS: usize = 80;
const DEFAULT_MAX_SEARCH_VECTOR_CHARS: usize = 3800;

/// One fully-normalized event, ready for hash lookup / issue assignment.
pub struct ProcessedEvent {
    pub event_id: Uuid,
    pub project_id: i64,
    pub organization_id: i64,
    pub received: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub event_type: IssueEventKind,
    pub level: EventLevel,
    pub title: String,
    pub transaction: Option<String>,
    pub culprit: Option<String>,
    pub tags: Vec<(String, String)>,
    pub hash: String,
    pub release_id: Option<i64>,
    pub data: serde_json::Value,
    pub request_url: Option<String>,
    pub stacktraces: Vec<Stacktrace>,
    pub issue_id: Option<i64>,
}

/// Parse the raw payload, run the normalizer, and derive title/culprit/hash.
/// Stateless — no DB access happens here; `issue_id` is filled in by
/// `process_issue_events` below.
pub fn process_raw_event(
    payload: serde_json::Value,
    event_id: Uuid,
    project_id: i64,
    organization_id: i64,
    received: DateTime<Utc>,
) -> ProcessedEvent {
    let mut payload = payload;
    normalize::sanitize_payload(&mut payload);

    let mut event: IngestIssueEvent = serde_json::from_value(payload.clone()).unwrap_or_default();
    let mut errors: Vec<EventError> = std::mem::take(&mut event.errors);
    let timestamp = normalize::normalize_timestamp(payload.get("timestamp"), received, &mut errors);

    let contexts = normalize::generate_contexts(&event);
    let tags = normalize::generate_tags(&event, &contexts);

    let (title, culprit, event_type) = derive_title_and_culprit(&event, &contexts);
    let level = event.level.unwrap_or(Level::Error);
    let fingerprint = fingerprint_hash(&event, &title, culprit.as_deref(), event_type);

    let stacktraces = event
        .exception
        .as_ref()
        .map(|list| {
            list.0
                .iter()
                .filter_map(|v| v.stacktrace.clone())
                .collect()
        })
        .unwrap_or_default();
    let request_url = event
        .request
        .as_ref()
        .and_then(|r| r.get("url"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    ProcessedEvent {
        event_id,
        project_id,
        organization_id,
        received,
        timestamp,
        event_type: map_event_kind(event_type),
        level: map_level(level),
        title: truncate_chars(&title, TITLE_MAX_CHARS),
        transaction: event.transaction.clone(),
        culprit,
        tags,
        hash: fingerprint,
        release_id: None,
        data: payload,
        request_url,
        stacktraces,
        issue_id: None,
    }
}

fn map_event_kind(t: IssueEventType) -> IssueEventKind {
    match t {
        IssueEventType::Error => IssueEventKind::Error,
        IssueEventType::Default => IssueEventKind::Default,
        IssueEventType::Csp => IssueEventKind::Csp,
    }
}

fn map_level(l: Level) -> EventLevel {
    match l {
        Level::Fatal => EventLevel::Fatal,
        Level::Error => EventLevel::Error,
        Level::Warning => EventLevel::Warning,
        Level::Info => EventLevel::Info,
        Level::Debug => EventLevel::Debug,
    }
}

fn derive_title_and_culprit(
    event: &IngestIssueEvent,
    _contexts: &DerivedContexts,
) -> (String, Option<String>, IssueEventType) {
    if let Some(csp) = &event.csp {
        return (csp_title(csp), Some(csp.effective_directive.clone()), IssueEventType::Csp);
    }
    if let Some(exceptions) = &event.exception {
        if !exceptions.is_empty() {
            let last = exceptions.last().expect("checked non-empty");
            return (
                error_title(last.exc_type.as_deref(), last.value.as_deref()),
                error_culprit(last.stacktrace.as_ref()),
                IssueEventType::Error,
            );
        }
    }
    let title = event
        .message
        .as_ref()
        .or(event.logentry.as_ref())
        .map(|m| m.formatted.clone())
        .unwrap_or_else(|| "<unknown>".to_string());
    (title, event.transaction.clone(), IssueEventType::Default)
}

fn error_title(exc_type: Option<&str>, value: Option<&str>) -> String {
    match (exc_type, value) {
        (Some(t), Some(v)) if !v.is_empty() => format!("{t}: {v}"),
        (Some(t), _) => t.to_string(),
        (None, Some(v)) => v.to_string(),
        (None, None) => "<unknown>".to_string(),
    }
}

/// Culprit from the top in-app frame if any, else the top frame overall —
/// the Sentry-style "location" heuristic (spec §4.5).
fn error_culprit(stacktrace: Option<&faultline_types::Stacktrace>) -> Option<String> {
    let frames = &stacktrace?.frames;
    let frame = frames
        .iter()
        .rev()
        .find(|f| f.in_app == Some(true))
        .or_else(|| frames.last())?;
    Some(frame_culprit(frame))
}

fn frame_culprit(frame: &faultline_types::StackFrame) -> String {
    match (&frame.module, &frame.function) {
        (Some(module), Some(function)) => format!("{module} in {function}"),
        (Some(module), None) => module.clone(),
        (None, Some(function)) => function.clone(),
        (None, None) => frame.filename.clone().unwrap_or_else(|| "<unknown>".to_string()),
    }
}

fn csp_title(csp: &CspReport) -> String {
    let netloc = csp
        .blocked_uri
        .split_once("://")
        .map(|(_, rest)| rest.split('/').next().unwrap_or(rest))
        .unwrap_or(csp.blocked_uri.as_str());
    format!("Blocked '{}' from '{}'", csp.effective_directive, netloc)
}

/// `MD5(title + culprit + event_type)`, or `MD5(fingerprint.join())` with
/// `{{ default }}` substituted by that same default input (spec §4.5).
fn fingerprint_hash(
    event: &IngestIssueEvent,
    title: &str,
    culprit: Option<&str>,
    event_type: IssueEventType,
) -> String {
    let default_input = format!("{title}{}{event_type:?}", culprit.unwrap_or(""));
    let input = match &event.fingerprint {
        Some(parts) if !parts.is_empty() => parts
            .iter()
            .map(|p| {
                if p == "{{ default }}" {
                    default_input.clone()
                } else {
                    p.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => default_input,
    };
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Run the full grouping algorithm over one batch and persist everything:
/// hash lookup, at-most-once issue creation with in-batch back-fill, issue
/// events, and the three aggregate maps (spec §4.5 "Grouping algorithm" /
/// "Aggregate updates" / "Issue incremental update").
///
/// Returns the set of issue ids touched by this batch, for the alert
/// evaluator's recent-issues set.
pub async fn process_issue_events(
    store: &EventStore,
    mut events: Vec<ProcessedEvent>,
    max_search_vector_chars: usize,
) -> Result<Vec<i64>, tokio_rusqlite::Error> {
    if events.is_empty() {
        return Ok(Vec::new());
    }

    let pairs: Vec<(i64, String)> = events
        .iter()
        .map(|e| (e.project_id, e.hash.clone()))
        .collect();
    let existing = store.load_issue_hashes(pairs).await?;

    let mut created_in_batch: HashMap<(i64, String), i64> = HashMap::new();
    let mut reopen_ids: Vec<i64> = Vec::new();

    for idx in 0..events.len() {
        let key = (events[idx].project_id, events[idx].hash.clone());

        if let Some(&issue_id) = created_in_batch.get(&key) {
            events[idx].issue_id = Some(issue_id);
            continue;
        }
        if let Some((issue_id, status)) = existing.get(&key) {
            events[idx].issue_id = Some(*issue_id);
            if *status == IssueStatus::Resolved {
                reopen_ids.push(*issue_id);
            }
            created_in_batch.insert(key, *issue_id);
            continue;
        }

        let short_id = store.next_short_id(events[idx].project_id).await?;
        let metadata = serde_json::json!({
            "culprit": events[idx].culprit,
            "transaction": events[idx].transaction,
        });
        let (issue_id, _created) = store
            .create_issue_or_reuse(
                events[idx].project_id,
                events[idx].hash.clone(),
                short_id,
                events[idx].title.clone(),
                events[idx].event_type,
                events[idx].level,
                metadata,
                events[idx].received,
            )
            .await?;
        events[idx].issue_id = Some(issue_id);
        created_in_batch.insert(key, issue_id);
    }

    let mut touched: Vec<i64> = Vec::new();
    let mut owned_events = Vec::with_capacity(events.len());
    let mut project_hour_counts: HashMap<(i64, chrono::NaiveDate, u8), (i64, i64)> = HashMap::new();
    let mut issue_hour_counts: HashMap<(i64, i64, chrono::NaiveDate, u8), i64> = HashMap::new();
    let mut tag_day_counts: HashMap<(chrono::NaiveDate, i64, String, String), i64> = HashMap::new();
    let mut issue_updates: HashMap<i64, IssueBatchUpdate> = HashMap::new();

    for event in &events {
        let issue_id = event.issue_id.expect("assigned above");
        touched.push(issue_id);

        owned_events.push(OwnedIssueEvent::from(IssueEventInput {
            event_id: event.event_id,
            received: event.received,
            project_id: event.project_id,
            issue_id,
            event_type: event.event_type,
            level: event.level,
            timestamp: event.timestamp,
            title: &event.title,
            transaction: event.transaction.as_deref(),
            culprit: event.culprit.as_deref(),
            tags: &event.tags,
            data: &event.data,
            hashes: std::slice::from_ref(&event.hash),
            release_id: event.release_id,
        }));

        let date = event.received.date_naive();
        let hour = event.received.hour() as u8;
        let entry = project_hour_counts.entry((event.project_id, date, hour)).or_insert((0, 0));
        entry.0 += 1;

        issue_hour_counts
            .entry((event.organization_id, issue_id, date, hour))
            .and_modify(|c| *c += 1)
            .or_insert(1);

        for (key, value) in &event.tags {
            *tag_day_counts
                .entry((date, issue_id, key.clone(), value.clone()))
                .or_insert(0) += 1;
        }

        let fragment = search_vector::build_fragment(&SearchVectorInput {
            title: &event.title,
            transaction_or_culprit: event.transaction.as_deref().or(event.culprit.as_deref()),
            request_url: event.request_url.as_deref(),
            stacktraces: &event.stacktraces,
        });

        let reopen = reopen_ids.contains(&issue_id);
        issue_updates
            .entry(issue_id)
            .and_modify(|u| {
                u.delta_count += 1;
                if event.received > u.last_seen {
                    u.last_seen = event.received;
                }
                if !u.search_vector_fragment.contains(&fragment) {
                    u.search_vector_fragment.push(' ');
                    u.search_vector_fragment.push_str(&fragment);
                }
                u.reopen = u.reopen || reopen;
            })
            .or_insert(IssueBatchUpdate {
                issue_id,
                delta_count: 1,
                last_seen: event.received,
                search_vector_fragment: fragment,
                reopen,
            });
    }

    store.insert_issue_events(owned_events).await?;

    let hourly_stats: Vec<_> = project_hour_counts
        .into_iter()
        .map(|((p, d, h), (times, txn_times))| (p, d, h, times, txn_times))
        .collect();
    store.upsert_project_hourly_statistics(hourly_stats).await?;

    let aggregates: Vec<_> = issue_hour_counts
        .into_iter()
        .map(|((org, issue, d, h), count)| (org, issue, d, h, count))
        .collect();
    store.upsert_issue_aggregates(aggregates).await?;

    let tags: Vec<_> = tag_day_counts
        .into_iter()
        .map(|((d, issue, k, v), count)| (d, issue, k, v, count))
        .collect();
    store.upsert_issue_tags(tags).await?;

    store
        .apply_issue_batch_updates(issue_updates.into_values().collect(), max_search_vector_chars)
        .await?;

    touched.sort_unstable();
    touched.dedup();
    Ok(touched)
}

pub fn default_max_search_vector_chars() -> usize {
    DEFAULT_MAX_SEARCH_VECTOR_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_title_prefers_type_and_value() {
        assert_eq!(error_title(Some("ValueError"), Some("bad input")), "ValueError: bad input");
        assert_eq!(error_title(Some("ValueError"), None), "ValueError");
        assert_eq!(error_title(None, Some("bad input")), "bad input");
        assert_eq!(error_title(None, None), "<unknown>");
    }

    #[test]
    fn csp_title_formats_directive_and_netloc() {
        let csp = CspReport {
            effective_directive: "script-src".to_string(),
            blocked_uri: "https://evil.example.com/x.js".to_string(),
            extra: Default::default(),
        };
        assert_eq!(csp_title(&csp), "Blocked 'script-src' from 'evil.example.com'");
    }

    #[test]
    fn fingerprint_default_input_is_deterministic() {
        let event = IngestIssueEvent::default();
        let a = fingerprint_hash(&event, "boom", Some("mod.fn"), IssueEventType::Error);
        let b = fingerprint_hash(&event, "boom", Some("mod.fn"), IssueEventType::Error);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn fingerprint_array_substitutes_default_token() {
        let mut event = IngestIssueEvent::default();
        event.fingerprint = Some(vec!["custom".to_string(), "{{ default }}".to_string()]);
        let with_custom = fingerprint_hash(&event, "boom", None, IssueEventType::Error);
        let mut plain_event = IngestIssueEvent::default();
        plain_event.fingerprint = None;
        let plain = fingerprint_hash(&plain_event, "boom", None, IssueEventType::Error);
        assert_ne!(with_custom, plain);
    }

    #[test]
    fn process_raw_event_extracts_error_title() {
        let payload = serde_json::json!({
            "exception": [{"type": "ValueError", "value": "bad"}],
            "level": "error",
        });
        let processed = process_raw_event(payload, Uuid::new_v4(), 1, 1, Utc::now());
        assert_eq!(processed.title, "ValueError: bad");
        assert_eq!(processed.event_type, IssueEventKind::Error);
    }
}
