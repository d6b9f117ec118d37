//! Outbound notification dispatch: Slack/Discord/Google Chat webhook senders
//! for issue alerts (spec §4.8).

pub mod types;
pub mod webhook;

pub use types::IssueSummary;
pub use webhook::{send_webhook_notification, NotifyError};
