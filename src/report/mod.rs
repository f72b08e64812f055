//! Report formatting
//!
//! Two surfaces: a JSON artifact for CI tooling and a human-readable
//! summary grouped by chart. Both are written on every run, including
//! clean ones, so downstream jobs can rely on the artifact existing.

use crate::domain::violations::{SentryError, SentryResult, Severity, ValidationReport, Violation};
use std::fs;
use std::path::Path;

/// Supported report renderings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Formatting knobs
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Emit ANSI color codes in the human format
    pub use_colors: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self { use_colors: true }
    }
}

/// Renders a validation report into the requested output format
#[derive(Debug, Clone, Default)]
pub struct ReportFormatter {
    options: ReportOptions,
}

impl ReportFormatter {
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    pub fn format(&self, report: &ValidationReport, format: OutputFormat) -> SentryResult<String> {
        match format {
            OutputFormat::Json => self.format_json(report),
            OutputFormat::Human => Ok(self.format_human(report)),
        }
    }

    /// Render and write the report to `path`
    pub fn write_to_file(
        &self,
        report: &ValidationReport,
        format: OutputFormat,
        path: &Path,
    ) -> SentryResult<()> {
        let content = self.format(report, format)?;
        fs::write(path, content).map_err(|e| {
            SentryError::report(format!("cannot write report to {}: {e}", path.display()))
        })
    }

    fn format_json(&self, report: &ValidationReport) -> SentryResult<String> {
        let violations: Vec<serde_json::Value> =
            report.violations.iter().map(violation_json).collect();
        serde_json::to_string_pretty(&violations)
            .map_err(|e| SentryError::report(format!("cannot serialize report: {e}")))
    }

    fn format_human(&self, report: &ValidationReport) -> String {
        let mut output = String::new();
        let counts = &report.summary.violations_by_severity;

        output.push_str("Chart Validation Report\n");
        output.push_str("=======================\n");
        output.push_str(&format!("Charts validated: {}\n", report.summary.charts_validated));
        output.push_str(&format!(
            "Violations: {} (critical {}, error {}, warning {}, info {})\n",
            counts.total(),
            counts.critical,
            counts.error,
            counts.warning,
            counts.info
        ));
        output.push_str(&format!("Completed in {}ms\n", report.summary.execution_time_ms));

        if report.violations.is_empty() {
            output.push_str("\nNo violations found.\n");
            return output;
        }

        let mut current_chart: Option<&Path> = None;
        for violation in &report.violations {
            if current_chart != Some(violation.chart_path.as_path()) {
                output.push_str(&format!("\n{}\n", violation.chart_path.display()));
                current_chart = Some(violation.chart_path.as_path());
            }
            output.push_str(&self.format_violation(violation));
        }
        output
    }

    fn format_violation(&self, violation: &Violation) -> String {
        let location = if violation.line > 0 {
            format!("{}:{}", violation.file_path.display(), violation.line)
        } else {
            violation.file_path.display().to_string()
        };
        let severity = self.paint_severity(violation.severity);

        let mut line = format!(
            "  {} [{}] {}: {}\n",
            location, severity, violation.rule_id, violation.message
        );
        if let Some(snippet) = &violation.snippet {
            line.push_str(&format!("    > {snippet}\n"));
        }
        if !violation.suggestion.is_empty() {
            line.push_str(&format!("    suggestion: {}\n", violation.suggestion));
        }
        line
    }

    fn paint_severity(&self, severity: Severity) -> String {
        if !self.options.use_colors {
            return severity.as_str().to_string();
        }
        let color = match severity {
            Severity::Critical => "\x1b[1;31m",
            Severity::Error => "\x1b[31m",
            Severity::Warning => "\x1b[33m",
            Severity::Info => "\x1b[36m",
        };
        format!("{color}{}\x1b[0m", severity.as_str())
    }
}

/// JSON shape of one violation; snippet and line attributions are folded
/// into the details map.
fn violation_json(violation: &Violation) -> serde_json::Value {
    let mut details = serde_json::Map::new();
    for (key, value) in &violation.details {
        details.insert(key.clone(), value.clone());
    }
    if let Some(snippet) = &violation.snippet {
        details.insert("snippet".to_string(), serde_json::json!(snippet));
    }

    serde_json::json!({
        "rule_id": violation.rule_id,
        "rule_name": violation.rule_name,
        "chart_path": violation.chart_path,
        "file": violation.file_path,
        "line": violation.line,
        "severity": violation.severity.as_str(),
        "message": violation.message,
        "suggestion": violation.suggestion,
        "details": details,
    })
}
