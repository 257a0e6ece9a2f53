//! Landing page rendering

use crate::batch::BatchOutcome;

const TEMPLATE: &str = include_str!("../../templates/index.html");

/// Session id shown before any pass has run
pub const PLACEHOLDER_SESSION_ID: &str = "dummy_session_id";

/// Values substituted into the page template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageView {
    pub session_id: String,
    pub status: String,
    /// Whether the session has artifacts to link
    pub has_artifacts: bool,
    pub failures: Vec<String>,
}

impl PageView {
    /// Page before any pass
    pub fn landing() -> Self {
        Self {
            session_id: PLACEHOLDER_SESSION_ID.to_string(),
            status: "Ready".to_string(),
            ..Default::default()
        }
    }

    /// Page after a completed pass
    pub fn from_outcome(outcome: &BatchOutcome) -> Self {
        // Saved pairs only fail at the results API
        let failures: Vec<String> = outcome
            .failures()
            .map(|p| {
                let error = p.error.as_deref().unwrap_or_default();
                if p.session_id.is_some() {
                    format!("{} (saved, not reported): {}", p.item_id, error)
                } else {
                    format!("{}: {}", p.item_id, error)
                }
            })
            .collect();
        let processed = outcome
            .pairs
            .iter()
            .filter(|p| p.session_id.is_some())
            .count();

        match &outcome.last_session_id {
            Some(session_id) => Self {
                session_id: session_id.clone(),
                status: format!(
                    "Processed {} of {} menu(s)",
                    processed,
                    outcome.pairs.len()
                ),
                has_artifacts: true,
                failures,
            },
            None => Self {
                session_id: String::new(),
                status: "No results".to_string(),
                has_artifacts: false,
                failures,
            },
        }
    }

    /// Page for a pass that failed as a whole
    pub fn from_error(err: &crate::error::Error) -> Self {
        Self {
            session_id: String::new(),
            status: format!("Batch pass failed: {}", err),
            ..Default::default()
        }
    }

    pub fn render(&self) -> String {
        let session_id = escape_html(&self.session_id);
        let artifacts = if self.has_artifacts {
            format!(
                "<div><img src=\"/results/{id}/input.png\" alt=\"input\">\
                 <img src=\"/results/{id}/output.png\" alt=\"output\"></div>\n  \
                 <p><a href=\"/results/{id}/result.json\">result.json</a></p>",
                id = session_id
            )
        } else {
            String::new()
        };
        let failures: String = self
            .failures
            .iter()
            .map(|f| format!("<li>{}</li>", escape_html(f)))
            .collect();

        TEMPLATE
            .replace("{{ session_id }}", &session_id)
            .replace("{{ status }}", &escape_html(&self.status))
            .replace("{{ artifacts }}", &artifacts)
            .replace("{{ failures }}", &failures)
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::PairOutcome;

    fn pair(item_id: &str, session_id: Option<&str>, error: Option<&str>) -> PairOutcome {
        PairOutcome {
            item_id: item_id.to_string(),
            menu_id: Some(item_id.to_string()),
            session_id: session_id.map(str::to_string),
            reported: error.is_none(),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_landing_page_uses_placeholder() {
        let html = PageView::landing().render();
        assert!(html.contains("<code id=\"session-id\">dummy_session_id</code>"));
        assert!(!html.contains("{{"));
        assert!(!html.contains("<img"));
    }

    #[test]
    fn test_outcome_page_links_last_session() {
        let outcome = BatchOutcome {
            last_session_id: Some("abc-123".to_string()),
            pairs: vec![pair("m0", None, Some("catalog down")), pair("m1", Some("abc-123"), None)],
        };

        let html = PageView::from_outcome(&outcome).render();

        assert!(html.contains("/results/abc-123/output.png"));
        assert!(html.contains("Processed 1 of 2 menu(s)"));
        assert!(html.contains("<li>m0: catalog down</li>"));
    }

    #[test]
    fn test_unreported_pair_counts_as_processed() {
        let mut unreported = pair("m1", Some("s1"), Some("report for menu `m1` failed"));
        unreported.reported = false;
        let outcome = BatchOutcome {
            last_session_id: Some("s1".to_string()),
            pairs: vec![unreported],
        };

        let view = PageView::from_outcome(&outcome);

        assert_eq!(view.status, "Processed 1 of 1 menu(s)");
        assert!(view.has_artifacts);
        assert_eq!(view.failures.len(), 1);
        assert!(view.failures[0].starts_with("m1 (saved, not reported): "));
    }

    #[test]
    fn test_no_results_page() {
        let html = PageView::from_outcome(&BatchOutcome::default()).render();
        assert!(html.contains("No results"));
        assert!(!html.contains("/results/"));
    }

    #[test]
    fn test_failures_are_escaped() {
        let outcome = BatchOutcome {
            last_session_id: None,
            pairs: vec![pair("<m1>", None, Some("bad \"body\" & more"))],
        };

        let html = PageView::from_outcome(&outcome).render();

        assert!(html.contains("&lt;m1&gt;: bad &quot;body&quot; &amp; more"));
        assert!(!html.contains("<m1>"));
    }

    #[test]
    fn test_error_page() {
        let err = crate::error::Error::Cancelled;
        let view = PageView::from_error(&err);
        assert!(view.status.starts_with("Batch pass failed"));
        assert!(view.render().contains("Batch pass failed"));
    }
}
