//! Alert Evaluator (spec §4.7), grounded in `scheduler.rs`'s struct-with-
//! async-method shape and `apps/alerts/tasks.py::process_event_alerts`'s
//! read-and-clear recent-issues idiom.
//!
//! The grouping stage records every issue it touches in a shared set; on a
//! fixed interval this evaluator swaps that set out, groups the touched
//! issues by project, re-checks each project's alert rules against the
//! rule's own time window, and dispatches a notification per rule that
//! clears its threshold.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashSet;
use faultline_core::store::EventStore;
use faultline_notify::{send_webhook_notification, IssueSummary};
use tracing::{info, warn};

/// Issues touched since the evaluator last ran, deduped by id. Populated by
/// the batch tier after each `grouping::process_issue_events` call.
#[derive(Default)]
pub struct RecentIssues(DashSet<i64>);

impl RecentIssues {
    pub fn new() -> Self {
        Self(DashSet::new())
    }

    pub fn record_all(&self, issue_ids: impl IntoIterator<Item = i64>) {
        for id in issue_ids {
            self.0.insert(id);
        }
    }

    /// Atomically take every currently-recorded issue id and clear the set.
    fn drain(&self) -> Vec<i64> {
        let ids: Vec<i64> = self.0.iter().map(|r| *r).collect();
        for id in &ids {
            self.0.remove(id);
        }
        ids
    }
}

pub struct AlertEvaluator {
    store: Arc<EventStore>,
    recent: Arc<RecentIssues>,
    client: reqwest::Client,
    max_issues_per_alert: usize,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<EventStore>,
        recent: Arc<RecentIssues>,
        dispatch_timeout_secs: u64,
        max_issues_per_alert: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(dispatch_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            store,
            recent,
            client,
            max_issues_per_alert,
        }
    }

    /// One evaluation pass: drain the recent-issues set, re-check every
    /// project with at least one touched issue, and dispatch notifications
    /// for rules that clear their threshold (spec §4.7 steps 1-4).
    pub async fn tick(&self) {
        let issue_ids = self.recent.drain();
        if issue_ids.is_empty() {
            return;
        }

        let issues = match self.store.issues_for_notification(issue_ids).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "alert evaluator: failed to load issues");
                return;
            }
        };

        let mut by_project: HashMap<i64, Vec<(faultline_core::model::Issue, String)>> = HashMap::new();
        for (issue, project_slug) in issues {
            by_project.entry(issue.project_id).or_default().push((issue, project_slug));
        }

        let project_ids: Vec<i64> = by_project.keys().copied().collect();
        let rules = match self.store.alert_rules_for_projects(project_ids).await {
            Ok(rules) => rules,
            Err(err) => {
                warn!(error = %err, "alert evaluator: failed to load alert rules");
                return;
            }
        };

        for rule in rules {
            let Some(project_issues) = by_project.get(&rule.project_id) else {
                continue;
            };
            self.evaluate_rule(&rule, project_issues).await;
        }
    }

    async fn evaluate_rule(
        &self,
        rule: &faultline_core::model::AlertRule,
        project_issues: &[(faultline_core::model::Issue, String)],
    ) {
        let window_start = chrono::Utc::now() - chrono::Duration::minutes(rule.timespan_minutes);
        let issue_ids: Vec<i64> = project_issues.iter().map(|(i, _)| i.id).collect();

        let candidates = match self
            .store
            .candidate_issue_counts(rule.id, rule.project_id, issue_ids, window_start)
            .await
        {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, rule_id = rule.id, "alert evaluator: failed to count candidates");
                return;
            }
        };

        let qualifying: Vec<i64> = candidates
            .into_iter()
            .filter(|(_, count)| *count >= rule.quantity_threshold)
            .map(|(issue_id, _)| issue_id)
            .collect();
        if qualifying.is_empty() {
            return;
        }

        let notification = match self
            .store
            .create_notification(rule.id, qualifying.clone(), chrono::Utc::now())
            .await
        {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, rule_id = rule.id, "alert evaluator: failed to create notification");
                return;
            }
        };

        let summaries: Vec<IssueSummary> = project_issues
            .iter()
            .filter(|(issue, _)| qualifying.contains(&issue.id))
            .map(|(issue, project_slug)| issue_summary(issue, project_slug))
            .collect();

        let mut all_ok = true;
        for recipient in &rule.recipients {
            let kind = recipient.kind;
            if let Err(err) = send_webhook_notification(
                &self.client,
                &recipient.url,
                kind,
                &summaries,
                summaries.len(),
                self.max_issues_per_alert,
            )
            .await
            {
                all_ok = false;
                warn!(error = %err, rule_id = rule.id, recipient = ?kind, "alert dispatch failed");
            }
        }

        if all_ok {
            if let Err(err) = self.store.mark_notification_dispatched(notification.id).await {
                warn!(error = %err, notification_id = notification.id, "failed to mark notification dispatched");
            } else {
                info!(rule_id = rule.id, issues = qualifying.len(), "alert dispatched");
            }
        }
    }
}

fn issue_summary(issue: &faultline_core::model::Issue, project_slug: &str) -> IssueSummary {
    let culprit = issue
        .metadata
        .get("culprit")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    IssueSummary {
        short_id: issue.short_id,
        title: issue.title.clone(),
        culprit,
        level: issue.level,
        project_name: project_slug.to_string(),
        detail_url: format!("/{project_slug}/issues/{}", issue.short_id),
        environment: None,
        server_name: None,
        release: None,
        extra_tags: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_issues_drain_clears_set() {
        let recent = RecentIssues::new();
        recent.record_all([1, 2, 2, 3]);
        let mut drained = recent.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(recent.drain().is_empty());
    }
}
