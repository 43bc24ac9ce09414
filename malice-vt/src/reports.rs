//! Report rendering
//!
//! This module renders a [`ScanReport`] as a Markdown summary table for
//! humans or as canonical JSON for downstream collaborators.

use serde::{Deserialize, Serialize};

use crate::model::{ScanReport, format_ratio};

/// Line printed in table mode for an unknown resource
pub const NOT_FOUND: &str = "Not found";

/// Presentation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Markdown summary table
    Table,
    /// Pretty-printed canonical JSON
    #[default]
    Json,
}

/// Render `report` in the requested mode
pub fn render(report: &ScanReport, mode: OutputMode) -> serde_json::Result<String> {
    match mode {
        OutputMode::Table => Ok(render_table(report)),
        OutputMode::Json => render_json(report),
    }
}

pub fn render_table(report: &ScanReport) -> String {
    if report.is_not_found() {
        return NOT_FOUND.to_string();
    }

    let lines = [
        "| Ratio | Link | API | Scanned |".to_string(),
        "|-------|------|-----|---------|".to_string(),
        format!(
            "| {} | [link]({}) | Public | {} |",
            format_ratio(report.detection_ratio()),
            report.permalink,
            report.scan_date
        ),
    ];
    lines.join("\n")
}

pub fn render_json(report: &ScanReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
