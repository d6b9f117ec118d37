//! `store`/`envelope`/`security` HTTP handlers (spec §6.2), grounded in
//! `views.py::event_envelope_view`'s response shapes and dedup/enqueue order.

use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use faultline_types::{
    CspReport, IngestIssueEvent, IngestTaskMessage, MessageKind, TransactionEventSchema,
};

use crate::auth::ResolvedAuth;
use crate::compression::decompress_capped;
use crate::envelope::parse_envelope;
use crate::error::ApiError;
use crate::state::AppState;

fn content_encoding(headers: &HeaderMap) -> Option<&str> {
    headers.get("content-encoding").and_then(|v| v.to_str().ok())
}

fn event_to_message(
    mut event: IngestIssueEvent,
    project_id: i64,
    organization_id: i64,
    client_ip: Option<&str>,
    fallback_event_id: Option<Uuid>,
) -> IngestTaskMessage {
    let event_id = event.event_id.unwrap_or_else(|| {
        fallback_event_id.unwrap_or_else(Uuid::new_v4)
    });
    event.event_id = Some(event_id);

    if let (Some(ip), Some(Value::Object(user))) = (client_ip, event.user.as_mut()) {
        user.insert("ip_address".to_string(), json!(ip));
    }

    let issue_type = event.issue_event_type();
    let mut payload = serde_json::to_value(&event).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut payload {
        map.insert("type".to_string(), json!(issue_type));
    }

    IngestTaskMessage {
        project_id,
        organization_id,
        event_id,
        kind: MessageKind::IssueEvent,
        payload,
        received: Utc::now(),
    }
}

fn transaction_to_message(
    txn: TransactionEventSchema,
    project_id: i64,
    organization_id: i64,
) -> IngestTaskMessage {
    let event_id = txn.event_id;
    let payload = serde_json::to_value(&txn).unwrap_or(Value::Null);
    IngestTaskMessage {
        project_id,
        organization_id,
        event_id,
        kind: MessageKind::Transaction,
        payload,
        received: Utc::now(),
    }
}

fn enqueue(state: &AppState, msg: IngestTaskMessage) -> Result<(), ApiError> {
    if !state.dedup.try_claim(msg.event_id) {
        return Ok(());
    }
    state.sender.try_send(msg).map_err(|e| match e {
        flume::TrySendError::Full(_) => ApiError::Throttled {
            retry_after_secs: 1,
        },
        flume::TrySendError::Disconnected(_) => {
            ApiError::Internal("ingest queue is closed".to_string())
        }
    })
}

/// `POST /api/<project_id>/store/` — single JSON event, no envelope framing.
pub async fn store_handler(
    State(state): State<AppState>,
    Path(_project_id): Path<i64>,
    Extension(auth): Extension<ResolvedAuth>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let decompressed =
        decompress_capped(content_encoding(&headers), &body, state.max_request_bytes).await?;
    let event: IngestIssueEvent = serde_json::from_slice(&decompressed)
        .map_err(|e| ApiError::EnvelopeMalformed(format!("invalid event: {e}")))?;

    let msg = event_to_message(
        event,
        auth.project.id,
        auth.organization.id,
        auth.client_ip.as_deref(),
        None,
    );
    let event_id = msg.event_id;
    enqueue(&state, msg)?;

    Ok(Json(json!({"event_id": event_id.as_simple().to_string()})))
}

/// `POST /api/<project_id>/envelope/` — newline-delimited envelope framing.
pub async fn envelope_handler(
    State(state): State<AppState>,
    Path(_project_id): Path<i64>,
    Extension(auth): Extension<ResolvedAuth>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let decompressed =
        decompress_capped(content_encoding(&headers), &body, state.max_request_bytes).await?;
    let parsed = parse_envelope(&decompressed)?;

    for event in parsed.events {
        let msg = event_to_message(
            event,
            auth.project.id,
            auth.organization.id,
            auth.client_ip.as_deref(),
            parsed.header.event_id,
        );
        enqueue(&state, msg)?;
    }
    for txn in parsed.transactions {
        let msg = transaction_to_message(txn, auth.project.id, auth.organization.id);
        enqueue(&state, msg)?;
    }

    match parsed.header.event_id {
        Some(id) => Ok(Json(json!({"id": id.as_simple().to_string()}))),
        None => Ok(Json(json!({}))),
    }
}

/// `POST /api/<project_id>/security/` — a standalone CSP report, wrapped as
/// a CSP-kind issue event.
pub async fn security_handler(
    State(state): State<AppState>,
    Path(_project_id): Path<i64>,
    Extension(auth): Extension<ResolvedAuth>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let decompressed =
        decompress_capped(content_encoding(&headers), &body, state.max_request_bytes).await?;
    let report: CspReport = serde_json::from_slice(&decompressed)
        .map_err(|e| ApiError::EnvelopeMalformed(format!("invalid CSP report: {e}")))?;

    let event = IngestIssueEvent {
        csp: Some(report),
        ..Default::default()
    };
    let msg = event_to_message(
        event,
        auth.project.id,
        auth.organization.id,
        auth.client_ip.as_deref(),
        None,
    );
    enqueue(&state, msg)?;

    Ok(axum::http::StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_to_message_generates_id_when_absent() {
        let event = IngestIssueEvent::default();
        let msg = event_to_message(event, 1, 1, None, None);
        assert_ne!(msg.event_id, Uuid::nil());
    }

    #[test]
    fn event_to_message_prefers_envelope_fallback_id() {
        let event = IngestIssueEvent::default();
        let fallback = Uuid::new_v4();
        let msg = event_to_message(event, 1, 1, None, Some(fallback));
        assert_eq!(msg.event_id, fallback);
    }

    #[test]
    fn event_to_message_injects_client_ip_into_user() {
        let mut event = IngestIssueEvent::default();
        event.user = Some(json!({"id": "42"}));
        let msg = event_to_message(event, 1, 1, Some("203.0.113.0"), None);
        assert_eq!(msg.payload["user"]["ip_address"], json!("203.0.113.0"));
        assert_eq!(msg.payload["user"]["id"], json!("42"));
    }

    #[test]
    fn event_to_message_carries_issue_type() {
        let event = IngestIssueEvent::default();
        let msg = event_to_message(event, 1, 1, None, None);
        assert_eq!(msg.payload["type"], json!("default"));
    }
}
