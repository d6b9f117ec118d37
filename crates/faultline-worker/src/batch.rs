//! Batch worker pool (spec §5 "batch tier"): drains the flume queue the
//! ingest HTTP surface feeds, splits each batch by `MessageKind`, and runs
//! issue events through the grouping pipeline and transactions through the
//! transaction-group aggregate path.
//!
//! Grounded in the teacher's `daemon.rs` background-loop shape, generalized
//! from a single `tokio::select!` over intervals to `worker_count` identical
//! consumers racing the same bounded channel — flume's MPMC receiver makes
//! that a direct clone-and-spawn rather than a dispatch table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use faultline_core::store::{EventStore, OwnedTransactionEvent};
use faultline_types::{IngestTaskMessage, MessageKind, TransactionEventSchema};
use tracing::{error, warn};

use crate::alerts::RecentIssues;
use crate::grouping;

pub struct BatchWorkerConfig {
    pub worker_count: usize,
    pub flush_every: usize,
    pub flush_interval: Duration,
    pub search_vector_max_chars: usize,
}

/// Spawn `worker_count` identical consumer loops over `receiver`. Each
/// accumulates up to `flush_every` messages (or whatever arrived within
/// `flush_interval`, whichever comes first) before processing.
pub fn spawn_workers(
    receiver: flume::Receiver<IngestTaskMessage>,
    store: Arc<EventStore>,
    recent: Arc<RecentIssues>,
    config: Arc<BatchWorkerConfig>,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..config.worker_count.max(1))
        .map(|worker_id| {
            let receiver = receiver.clone();
            let store = store.clone();
            let recent = recent.clone();
            let config = config.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, receiver, store, recent, config).await;
            })
        })
        .collect()
}

async fn worker_loop(
    worker_id: usize,
    receiver: flume::Receiver<IngestTaskMessage>,
    store: Arc<EventStore>,
    recent: Arc<RecentIssues>,
    config: Arc<BatchWorkerConfig>,
) {
    loop {
        let mut batch = Vec::with_capacity(config.flush_every);
        match receiver.recv_async().await {
            Ok(first) => batch.push(first),
            Err(_) => {
                warn!(worker_id, "batch worker: channel closed, exiting");
                return;
            }
        }

        let deadline = tokio::time::Instant::now() + config.flush_interval;
        while batch.len() < config.flush_every {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(msg)) => batch.push(msg),
                Ok(Err(_)) => break,
                Err(_) => break,
            }
        }

        process_batch(&store, &recent, batch, config.search_vector_max_chars).await;
    }
}

async fn process_batch(
    store: &EventStore,
    recent: &RecentIssues,
    batch: Vec<IngestTaskMessage>,
    search_vector_max_chars: usize,
) {
    let mut issue_events = Vec::new();
    let mut transactions = Vec::new();
    for msg in batch {
        match msg.kind {
            MessageKind::IssueEvent => issue_events.push(msg),
            MessageKind::Transaction => transactions.push(msg),
        }
    }

    if !issue_events.is_empty() {
        let processed: Vec<_> = issue_events
            .into_iter()
            .map(|msg| {
                grouping::process_raw_event(
                    msg.payload,
                    msg.event_id,
                    msg.project_id,
                    msg.organization_id,
                    msg.received,
                )
            })
            .collect();

        match grouping::process_issue_events(store, processed, search_vector_max_chars).await {
            Ok(touched) => recent.record_all(touched),
            Err(err) => error!(error = %err, "batch worker: issue event processing failed"),
        }
    }

    if !transactions.is_empty() {
        if let Err(err) = process_transactions(store, transactions).await {
            error!(error = %err, "batch worker: transaction processing failed");
        }
    }
}

async fn process_transactions(
    store: &EventStore,
    messages: Vec<IngestTaskMessage>,
) -> Result<(), tokio_rusqlite::Error> {
    let mut owned_events = Vec::with_capacity(messages.len());
    let mut minute_counters: HashMap<(i64, i64, chrono::DateTime<Utc>), (i64, f64, f64)> = HashMap::new();

    for msg in messages {
        let schema: TransactionEventSchema = match serde_json::from_value(msg.payload.clone()) {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, event_id = %msg.event_id, "dropping malformed transaction payload");
                continue;
            }
        };

        if let Some(version) = schema.release.as_ref().filter(|v| !v.is_empty()) {
            store.get_or_create_release(msg.organization_id, version.clone()).await?;
        }

        let op = schema.trace_op().unwrap_or_else(|| "default".to_string());
        let method = schema
            .contexts
            .as_ref()
            .and_then(|c| c.get("trace"))
            .and_then(|t| t.get("method"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let group_id = store
            .get_or_create_transaction_group(msg.project_id, schema.transaction.clone(), op, method)
            .await?;

        let timestamp = schema.timestamp.unwrap_or(msg.received);
        let duration_ms = schema.duration_ms().unwrap_or(0.0);

        owned_events.push(OwnedTransactionEvent {
            event_id: msg.event_id,
            received: msg.received,
            group_id,
            project_id: msg.project_id,
            duration_ms,
            timestamp,
            data: msg.payload,
        });

        let minute = timestamp
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(timestamp);
        let entry = minute_counters
            .entry((msg.organization_id, group_id, minute))
            .or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += duration_ms;
        entry.2 += duration_ms * duration_ms;
    }

    store.insert_transaction_events(owned_events).await?;

    let aggregates: Vec<_> = minute_counters
        .into_iter()
        .map(|((org, group, minute), (count, total_ms, sumsq_ms))| (org, group, minute, count, total_ms, sumsq_ms))
        .collect();
    store.upsert_transaction_group_aggregates(aggregates).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn transaction_message(
        project_id: i64,
        organization_id: i64,
        transaction: &str,
        start: chrono::DateTime<Utc>,
        duration_ms: i64,
    ) -> IngestTaskMessage {
        let end = start + ChronoDuration::milliseconds(duration_ms);
        let payload = serde_json::json!({
            "event_id": Uuid::new_v4(),
            "timestamp": end,
            "start_timestamp": start,
            "transaction": transaction,
            "contexts": { "trace": { "op": "http.server" } },
        });
        IngestTaskMessage {
            project_id,
            organization_id,
            event_id: Uuid::new_v4(),
            kind: MessageKind::Transaction,
            payload,
            received: end,
        }
    }

    #[tokio::test]
    async fn process_transactions_groups_and_aggregates_by_minute() {
        let store = EventStore::new_in_memory().await.unwrap();
        let start = chrono::Utc::now().with_nanosecond(0).unwrap();

        let messages = vec![
            transaction_message(1, 10, "/api/widgets", start, 50),
            transaction_message(1, 10, "/api/widgets", start, 150),
            transaction_message(1, 10, "/api/other", start, 10),
        ];

        process_transactions(&store, messages).await.unwrap();

        let snapshot = store.status_snapshot().await.unwrap();
        assert_eq!(snapshot.transactions_total, 3);
    }

    #[tokio::test]
    async fn process_transactions_skips_malformed_payload() {
        let store = EventStore::new_in_memory().await.unwrap();
        let bad = IngestTaskMessage {
            project_id: 1,
            organization_id: 10,
            event_id: Uuid::new_v4(),
            kind: MessageKind::Transaction,
            payload: serde_json::json!({ "not": "a transaction" }),
            received: chrono::Utc::now(),
        };

        process_transactions(&store, vec![bad]).await.unwrap();

        let snapshot = store.status_snapshot().await.unwrap();
        assert_eq!(snapshot.transactions_total, 0);
    }
}
