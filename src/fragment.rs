//! # Fragment Rendering
//!
//! Markup appended to the results view after each invocation, and the summary
//! shown once a run completes. All interpolated text is HTML-escaped by askama.

use askama::Template;

use crate::controller::Tallies;
use crate::error::Result;
use crate::operation::ItemReport;

#[derive(Template)]
#[template(
    source = "{% for report in reports %}<p class=\"bulk-process-item bulk-process-{{ report.outcome }}\">{{ report.position }}. <strong>#{{ report.key }}</strong> {{ report.label }}: {{ report.message }}</p>\n{% endfor %}",
    ext = "html"
)]
struct ItemsFragment<'a> {
    reports: &'a [ItemReport],
}

#[derive(Template)]
#[template(
    source = "<div class=\"bulk-process-summary\"><h2>{{ label }}</h2><p>Bulk process completed.</p><ul><li class=\"bulk-process-success\">{{ tallies.success }} updated</li><li class=\"bulk-process-skipped\">{{ tallies.skipped }} skipped</li><li class=\"bulk-process-failed\">{{ tallies.failed }} failed</li></ul></div>",
    ext = "html"
)]
struct SummaryFragment<'a> {
    label: &'a str,
    tallies: &'a Tallies,
}

/// One `<p>` per processed item; empty for an empty slice
pub fn render_items(reports: &[ItemReport]) -> Result<String> {
    Ok(ItemsFragment { reports }.render()?)
}

/// Completion summary for the "done" step
pub fn render_summary(label: &str, tallies: &Tallies) -> Result<String> {
    Ok(SummaryFragment { label, tallies }.render()?)
}
