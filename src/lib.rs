//! chart-sentry: rule-driven validation for chart bundles
//!
//! Renders every chart under a directory tree through an external
//! templating tool, splits the combined output back into per-template
//! fragments, and evaluates a YAML-defined rule set against both the raw
//! text and the parsed structure of each fragment. Findings are attributed
//! back to source templates and line numbers where possible and collected
//! into a single report with a CI-friendly exit-code policy: 0 clean,
//! 1 violations, 2 when anything critical happened (including render or
//! validator failures).
//!
//! # Example
//!
//! ```no_run
//! use chart_sentry::ChartSentry;
//!
//! let report = ChartSentry::new(&["rules/"]).validate(std::path::Path::new("charts/"));
//! std::process::exit(report.exit_code());
//! ```

pub mod cache;
pub mod charts;
pub mod domain;
pub mod engine;
pub mod lines;
pub mod manifest;
pub mod orchestrator;
pub mod render;
pub mod report;
pub mod rules;

pub use cache::ChartCache;
pub use domain::{
    SentryError, SentryResult, Severity, ValidationReport, ValidationSummary, Violation,
    ViolationCounts,
};
pub use engine::plugins::{PluginContext, PluginOutcome, PluginRegistry};
pub use engine::RuleEngine;
pub use orchestrator::{Orchestrator, RunOptions};
pub use render::{HelmRenderer, RenderOutcome, Renderer};
pub use report::{OutputFormat, ReportFormatter, ReportOptions};
pub use rules::{Rule, RuleKind, RuleSet};

use std::path::{Path, PathBuf};

/// High-level entry point wiring rules, renderer, plugins and cache into
/// one validation run.
pub struct ChartSentry {
    rule_set: RuleSet,
    renderer: Box<dyn Renderer>,
    plugins: PluginRegistry,
    options: RunOptions,
    cache: Option<ChartCache>,
}

impl ChartSentry {
    /// Load rules from the given files or directories and set up the
    /// default `helm` renderer and built-in plugins.
    pub fn new<P: AsRef<Path>>(rule_sources: &[P]) -> Self {
        Self {
            rule_set: RuleSet::load(rule_sources),
            renderer: Box::new(HelmRenderer::default()),
            plugins: PluginRegistry::with_builtins(),
            options: RunOptions::default(),
            cache: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Persist and replay per-chart results through a cache file
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache = Some(ChartCache::load(path.into()));
        self
    }

    /// Register a custom plugin callback under `name`
    pub fn register_plugin<F>(&mut self, name: impl Into<String>, plugin: F)
    where
        F: Fn(&[serde_yaml::Value], &PluginContext, &Rule) -> SentryResult<PluginOutcome>
            + Send
            + Sync
            + 'static,
    {
        self.plugins.register(name, plugin);
    }

    /// Validate every chart under `charts_root`
    pub fn validate(self, charts_root: &Path) -> ValidationReport {
        let mut orchestrator =
            Orchestrator::new(self.rule_set, self.renderer, self.plugins, self.options);
        if let Some(cache) = self.cache {
            orchestrator = orchestrator.with_cache(cache);
        }
        orchestrator.run(charts_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct FixedRenderer(String);

    impl Renderer for FixedRenderer {
        fn render(
            &self,
            _chart_dir: &Path,
            _values: &[PathBuf],
            _env: Option<&str>,
        ) -> SentryResult<RenderOutcome> {
            Ok(RenderOutcome::Rendered(self.0.clone()))
        }
    }

    fn workspace(rules: &str, template: &str) -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let chart = temp_dir.path().join("charts/api");
        fs::create_dir_all(chart.join("templates")).unwrap();
        fs::write(chart.join("Chart.yaml"), "name: api\n").unwrap();
        fs::write(chart.join("templates/deployment.yaml"), template).unwrap();
        let rules_file = temp_dir.path().join("rules.yaml");
        fs::write(&rules_file, rules).unwrap();
        (temp_dir, rules_file)
    }

    #[test]
    fn test_cpu_limit_violation_references_the_template() {
        let template = "resources:\n  limits:\n    cpu: 6\n";
        let (workspace_dir, rules_file) = workspace(
            r#"
- id: cpu-cap
  type: numeric_check
  severity: critical
  numeric_check:
    key: resources.limits.cpu
    max: "4"
"#,
            template,
        );
        let combined = format!("# Source: api/templates/deployment.yaml\n{template}");

        let report = ChartSentry::new(&[&rules_file])
            .with_renderer(Box::new(FixedRenderer(combined)))
            .validate(workspace_dir.path());

        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.violations.len(), 1);
        let violation = &report.violations[0];
        assert_eq!(violation.rule_id, "cpu-cap");
        assert!(violation.message.contains("exceeds maximum"));
        assert!(violation.file_path.ends_with("templates/deployment.yaml"));
    }

    #[test]
    fn test_denied_credentials_field() {
        let template = "credentials:\n  password: hunter2\n";
        let (workspace_dir, rules_file) = workspace(
            r#"
- id: no-password
  type: deny_fields
  severity: error
  deny_fields: ["credentials.password"]
"#,
            template,
        );
        let combined = format!("# Source: api/templates/deployment.yaml\n{template}");

        let report = ChartSentry::new(&[&rules_file])
            .with_renderer(Box::new(FixedRenderer(combined)))
            .validate(workspace_dir.path());

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.violations[0].rule_id, "no-password");
    }

    #[test]
    fn test_repeated_runs_are_idempotent() {
        let template = "image: nginx:latest\n";
        let rules = "- id: no-latest\n  type: pattern\n  pattern: \":latest\"\n";
        let (workspace_dir, rules_file) = workspace(rules, template);
        let combined = format!("# Source: api/templates/deployment.yaml\n{template}");

        let first = ChartSentry::new(&[&rules_file])
            .with_renderer(Box::new(FixedRenderer(combined.clone())))
            .validate(workspace_dir.path());
        let second = ChartSentry::new(&[&rules_file])
            .with_renderer(Box::new(FixedRenderer(combined)))
            .validate(workspace_dir.path());

        assert_eq!(first.violations.len(), second.violations.len());
        assert_eq!(first.violations[0].rule_id, second.violations[0].rule_id);
        assert_eq!(first.violations[0].line, second.violations[0].line);
        assert_eq!(first.exit_code(), second.exit_code());
    }

    #[test]
    fn test_custom_plugin_is_dispatched() {
        let template = "kind: Service\n";
        let (workspace_dir, rules_file) = workspace(
            "- id: custom\n  type: plugin\n  plugin: block_everything\n  severity: error\n",
            template,
        );
        let combined = format!("# Source: api/templates/deployment.yaml\n{template}");

        let mut sentry = ChartSentry::new(&[&rules_file])
            .with_renderer(Box::new(FixedRenderer(combined)));
        sentry.register_plugin("block_everything", |_docs, _ctx, _rule| {
            Ok(PluginOutcome::fail("blocked by policy"))
        });
        let report = sentry.validate(workspace_dir.path());

        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].message, "blocked by policy");
    }

    #[test]
    fn test_panicking_plugin_becomes_a_critical_violation() {
        let template = "kind: Service\n";
        let (workspace_dir, rules_file) = workspace(
            "- id: unstable\n  type: plugin\n  plugin: unstable_check\n  severity: warning\n",
            template,
        );
        let combined = format!("# Source: api/templates/deployment.yaml\n{template}");

        let mut sentry = ChartSentry::new(&[&rules_file])
            .with_renderer(Box::new(FixedRenderer(combined)));
        sentry.register_plugin(
            "unstable_check",
            |_docs, _ctx, _rule| -> SentryResult<PluginOutcome> { panic!("plugin blew up") },
        );
        let report = sentry.validate(workspace_dir.path());

        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.violations.len(), 1);
        let violation = &report.violations[0];
        assert_eq!(violation.rule_id, "unstable");
        assert_eq!(violation.severity, Severity::Critical);
        assert!(violation.message.contains("plugin blew up"));
    }
}
