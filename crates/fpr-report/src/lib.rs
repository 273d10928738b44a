//! Email bodies for a batch run.

use askama::Template;
use fpr_core::BatchReport;
use thiserror::Error;

pub const CRATE_NAME: &str = "fpr-report";

pub const REPORT_TITLE: &str = "Forecast Projection Results";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("rendering report: {0}")]
    Render(#[from] askama::Error),
}

#[derive(Template)]
#[template(path = "report_email.html")]
struct ReportEmailTemplate<'a> {
    title: &'a str,
    report: &'a BatchReport,
    year: i32,
}

/// Full HTML email for a finished batch: one table per outcome bucket.
pub fn render_report_html(report: &BatchReport, year: i32) -> Result<String, ReportError> {
    let tpl = ReportEmailTemplate {
        title: REPORT_TITLE,
        report,
        year,
    };
    Ok(tpl.render()?)
}

/// Plain-text body sent when the run fails before a report exists.
pub fn failure_body(message: &str) -> String {
    format!("Error processing data: {message}")
}
