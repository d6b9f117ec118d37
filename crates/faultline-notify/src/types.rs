use faultline_core::model::EventLevel;

/// One issue to render into a notification. Built by the caller (the alert
/// evaluator) from store rows plus whichever tags it looked up; this crate
/// never touches a database itself.
#[derive(Debug, Clone)]
pub struct IssueSummary {
    pub short_id: i64,
    pub title: String,
    pub culprit: String,
    pub level: EventLevel,
    pub project_name: String,
    pub detail_url: String,
    pub environment: Option<String>,
    pub server_name: Option<String>,
    pub release: Option<String>,
    pub extra_tags: Vec<(String, String)>,
}

impl IssueSummary {
    /// `"PROJECT-123: title"`, the original's `str(issue)`.
    pub fn display_name(&self) -> String {
        format!("{}-{}: {}", self.project_name, self.short_id, self.title)
    }

    /// Severity-to-accent-color mapping used by Slack/Discord attachments.
    /// Not part of the wire protocol; picked to mirror a fixed severity palette.
    pub fn hex_color(&self) -> &'static str {
        match self.level {
            EventLevel::Fatal | EventLevel::Error => "#E03131",
            EventLevel::Warning => "#F08C00",
            EventLevel::Info => "#1971C2",
            EventLevel::Debug => "#868E96",
        }
    }

    pub(crate) fn decimal_color(&self) -> u32 {
        u32::from_str_radix(self.hex_color().trim_start_matches('#'), 16).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IssueSummary {
        IssueSummary {
            short_id: 42,
            title: "NullPointerException".into(),
            culprit: "app.views.checkout".into(),
            level: EventLevel::Error,
            project_name: "storefront".into(),
            detail_url: "https://example.com/issues/42".into(),
            environment: Some("production".into()),
            server_name: None,
            release: Some("1.2.3".into()),
            extra_tags: vec![],
        }
    }

    #[test]
    fn display_name_matches_project_short_id_title() {
        assert_eq!(
            sample().display_name(),
            "storefront-42: NullPointerException"
        );
    }

    #[test]
    fn decimal_color_parses_hex() {
        assert_eq!(sample().decimal_color(), 0xE0_31_31);
    }
}
