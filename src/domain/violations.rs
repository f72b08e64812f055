//! Violations, severities and the aggregate validation report
//!
//! Violations are created by the rule engine, optionally enriched with
//! line/snippet information by the line resolver, and immutable once they
//! reach the report. The report is the single aggregate handed to the
//! formatters and the exit-code policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Severity levels for chart validation violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational findings
    Info,
    /// Should be addressed but does not gate a deploy
    Warning,
    /// Blocks a deploy; drives exit code 1
    Error,
    /// Validator-level failures (render, plugin, internal); drives exit code 2
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// Whether this severity alone escalates the process exit code to 2
    pub fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Warning
    }
}

/// A single rule violation attributed to a chart and, best-effort, to the
/// source template file and line it originated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Identifier of the rule that produced this violation
    pub rule_id: String,
    /// Human-readable rule name
    pub rule_name: String,
    /// Chart directory the violation belongs to
    pub chart_path: PathBuf,
    /// Source file attribution; falls back to the chart path when the
    /// rendered fragment could not be resolved to a template on disk
    pub file_path: PathBuf,
    /// 1-based line number in the source template, 0 when not text-localized
    pub line: u32,
    pub severity: Severity,
    pub message: String,
    /// Source line content when the line resolver found a match
    pub snippet: Option<String>,
    pub suggestion: String,
    /// Free-form structured context (matched text, line number lists, hits)
    pub details: BTreeMap<String, serde_json::Value>,
    /// When this violation was detected
    pub detected_at: DateTime<Utc>,
}

impl Violation {
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        chart_path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        let chart_path = chart_path.into();
        Self {
            rule_id: rule_id.into(),
            rule_name: String::new(),
            file_path: chart_path.clone(),
            chart_path,
            line: 0,
            severity,
            message: message.into(),
            snippet: None,
            suggestion: String::new(),
            details: BTreeMap::new(),
            detected_at: Utc::now(),
        }
    }

    pub fn with_rule_name(mut self, name: impl Into<String>) -> Self {
        self.rule_name = name.into();
        self
    }

    pub fn with_file(mut self, file_path: impl Into<PathBuf>) -> Self {
        self.file_path = file_path.into();
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Attach line attribution recovered by the line resolver
    pub fn set_location(&mut self, line: u32, snippet: impl Into<String>) {
        self.line = line;
        self.snippet = Some(snippet.into());
    }

    /// Format for single-line display
    pub fn format_display(&self) -> String {
        let location = if self.line > 0 { format!(":{}", self.line) } else { String::new() };
        format!(
            "{}{} [{}] {}: {}",
            self.file_path.display(),
            location,
            self.severity.as_str(),
            self.rule_id,
            self.message
        )
    }
}

/// Count of violations by severity level
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViolationCounts {
    pub critical: usize,
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl ViolationCounts {
    pub fn total(&self) -> usize {
        self.critical + self.error + self.warning + self.info
    }

    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }
}

/// Summary statistics for a validation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Number of chart directories processed
    pub charts_validated: usize,
    pub violations_by_severity: ViolationCounts,
    pub execution_time_ms: u64,
    pub validated_at: DateTime<Utc>,
}

/// Aggregate result of one validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub summary: ValidationSummary,
    /// Fingerprint of the rule set used for this run
    pub rules_fingerprint: Option<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            violations: Vec::new(),
            summary: ValidationSummary { validated_at: Utc::now(), ..Default::default() },
            rules_fingerprint: None,
        }
    }

    pub fn add_violation(&mut self, violation: Violation) {
        self.summary.violations_by_severity.add(violation.severity);
        self.violations.push(violation);
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn has_critical(&self) -> bool {
        self.summary.violations_by_severity.critical > 0
    }

    pub fn set_charts_validated(&mut self, count: usize) {
        self.summary.charts_validated = count;
    }

    pub fn set_execution_time(&mut self, duration_ms: u64) {
        self.summary.execution_time_ms = duration_ms;
    }

    pub fn set_rules_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.rules_fingerprint = Some(fingerprint.into());
    }

    /// Process exit code derived from the severities present:
    /// 0 clean, 1 violations, 2 at least one critical.
    pub fn exit_code(&self) -> i32 {
        if self.has_critical() {
            2
        } else if self.has_violations() {
            1
        } else {
            0
        }
    }

    /// Sort by chart path, file path and line so output is deterministic
    /// regardless of which worker finished first.
    pub fn sort_violations(&mut self) {
        self.violations.sort_by(|a, b| {
            a.chart_path
                .cmp(&b.chart_path)
                .then_with(|| a.file_path.cmp(&b.file_path))
                .then_with(|| a.line.cmp(&b.line))
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Error types that can occur during validation
#[derive(Debug, thiserror::Error)]
pub enum SentryError {
    /// Rule source could not be loaded or parsed
    #[error("Rule error: {message}")]
    Rules { message: String },

    /// File could not be read or accessed
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Pattern compilation failed
    #[error("Pattern error: {message}")]
    Pattern { message: String },

    /// External render tool failed in a way that is not a plain non-zero exit
    #[error("Render error for {chart}: {message}")]
    Render { chart: String, message: String },

    /// Rule evaluation failed for a specific rule
    #[error("Evaluation error in rule '{rule_id}': {message}")]
    Evaluation { rule_id: String, message: String },

    /// Cache operation failed
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Report serialization or output failed
    #[error("Report error: {message}")]
    Report { message: String },
}

impl SentryError {
    pub fn rules(message: impl Into<String>) -> Self {
        Self::Rules { message: message.into() }
    }

    pub fn pattern(message: impl Into<String>) -> Self {
        Self::Pattern { message: message.into() }
    }

    pub fn render(chart: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render { chart: chart.into(), message: message.into() }
    }

    pub fn evaluation(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation { rule_id: rule_id.into(), message: message.into() }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache { message: message.into() }
    }

    pub fn report(message: impl Into<String>) -> Self {
        Self::Report { message: message.into() }
    }
}

/// Result type for chart-sentry operations
pub type SentryResult<T> = Result<T, SentryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_violation_creation() {
        let violation =
            Violation::new("no-latest-tag", Severity::Error, "charts/api", "latest tag found")
                .with_rule_name("Disallow latest image tag")
                .with_file("charts/api/templates/deployment.yaml");

        assert_eq!(violation.rule_id, "no-latest-tag");
        assert_eq!(violation.severity, Severity::Error);
        assert_eq!(violation.chart_path, Path::new("charts/api"));
        assert_eq!(violation.file_path, Path::new("charts/api/templates/deployment.yaml"));
        assert_eq!(violation.line, 0);
    }

    #[test]
    fn test_file_defaults_to_chart_path() {
        let violation = Violation::new("r1", Severity::Warning, "charts/api", "msg");
        assert_eq!(violation.file_path, violation.chart_path);
    }

    #[test]
    fn test_set_location() {
        let mut violation = Violation::new("r1", Severity::Warning, "charts/api", "msg");
        violation.set_location(42, "image: nginx:latest");

        assert_eq!(violation.line, 42);
        assert_eq!(violation.snippet.as_deref(), Some("image: nginx:latest"));
        assert!(violation.format_display().contains(":42"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Critical.is_critical());
        assert!(!Severity::Error.is_critical());
    }

    #[test]
    fn test_exit_code_policy() {
        let mut report = ValidationReport::new();
        assert_eq!(report.exit_code(), 0);

        report.add_violation(Violation::new("r1", Severity::Warning, "charts/a", "warn"));
        assert_eq!(report.exit_code(), 1);

        report.add_violation(Violation::new("r2", Severity::Critical, "charts/b", "boom"));
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.summary.violations_by_severity.total(), 2);
    }

    #[test]
    fn test_sort_is_deterministic() {
        let mut report = ValidationReport::new();
        let mut late = Violation::new("r1", Severity::Warning, "charts/b", "m");
        late.line = 7;
        report.add_violation(late);
        report.add_violation(Violation::new("r2", Severity::Error, "charts/a", "m"));
        report.sort_violations();

        assert_eq!(report.violations[0].chart_path, Path::new("charts/a"));
        assert_eq!(report.violations[1].line, 7);
    }
}
