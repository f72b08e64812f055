//! Per-chart validation pipeline and parallel fan-out
//!
//! Charts are independent, so they are validated on a bounded worker pool
//! and the per-chart results merged afterwards. A chart that fails inside
//! the pipeline never aborts the run; the failure becomes a critical
//! violation attributed to that chart.

use crate::cache::ChartCache;
use crate::charts::{discover_charts, is_ignored_chart};
use crate::domain::violations::{SentryError, Severity, ValidationReport, Violation};
use crate::engine::plugins::{panic_message, PluginRegistry};
use crate::engine::RuleEngine;
use crate::lines::find_line_matches;
use crate::manifest::{parse_documents, resolve_fragments, split_fragments, RenderedFragment};
use crate::render::{RenderOutcome, Renderer};
use crate::rules::RuleSet;
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// Rule id attached to render failures
pub const RENDER_FAILED_RULE: &str = "helm-render-failed";
/// Rule id attached to internal pipeline failures
pub const VALIDATOR_ERROR_RULE: &str = "validator-error";

/// Knobs for one validation run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker pool width for chart fan-out
    pub concurrency: usize,
    /// Deployment environment forwarded to the renderer and env matching
    pub env: Option<String>,
    /// Extra values files forwarded to the renderer
    pub values: Vec<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { concurrency: 4, env: None, values: Vec::new() }
    }
}

struct ChartResult {
    chart: PathBuf,
    digest: Option<String>,
    violations: Vec<Violation>,
    from_cache: bool,
}

/// Drives the full validation run over a chart tree
pub struct Orchestrator {
    rule_set: RuleSet,
    engine: RuleEngine,
    renderer: Box<dyn Renderer>,
    cache: Option<ChartCache>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        rule_set: RuleSet,
        renderer: Box<dyn Renderer>,
        plugins: PluginRegistry,
        options: RunOptions,
    ) -> Self {
        let engine = RuleEngine::new(&rule_set, plugins);
        Self { rule_set, engine, renderer, cache: None, options }
    }

    /// Enable result caching; entries are replayed for charts whose
    /// sources and rules are unchanged.
    pub fn with_cache(mut self, cache: ChartCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate every chart under `charts_root` and assemble the report
    pub fn run(&mut self, charts_root: &Path) -> ValidationReport {
        let started = Instant::now();
        let mut report = ValidationReport::new();
        report.set_rules_fingerprint(self.rule_set.fingerprint());

        for violation in &self.rule_set.load_violations {
            report.add_violation(violation.clone());
        }

        let charts: Vec<PathBuf> = discover_charts(charts_root)
            .into_iter()
            .filter(|chart| {
                if is_ignored_chart(chart, &self.rule_set.ignore_charts) {
                    tracing::debug!("Skipping ignored chart {}", chart.display());
                    false
                } else {
                    true
                }
            })
            .collect();
        report.set_charts_validated(charts.len());
        tracing::info!("Validating {} chart(s) under {}", charts.len(), charts_root.display());

        let results = self.fan_out(&charts);

        if let Some(cache) = self.cache.as_mut() {
            for result in &results {
                if let (false, Some(digest)) = (result.from_cache, &result.digest) {
                    cache.store(&result.chart, digest.clone(), result.violations.clone());
                }
            }
            if let Err(e) = cache.save() {
                tracing::warn!("Failed to persist cache: {}", e);
            }
        }

        for result in results {
            for violation in result.violations {
                report.add_violation(violation);
            }
        }

        report.sort_violations();
        report.set_execution_time(started.elapsed().as_millis() as u64);
        report
    }

    fn fan_out(&self, charts: &[PathBuf]) -> Vec<ChartResult> {
        let cache = self.cache.as_ref();
        // The lock guards only the append; rendering and evaluation run
        // outside it.
        let results = Mutex::new(Vec::with_capacity(charts.len()));
        let worker = |chart: &PathBuf| {
            let result = self.validate_chart(chart, cache);
            if let Ok(mut results) = results.lock() {
                results.push(result);
            }
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .build();
        match pool {
            Ok(pool) => pool.install(|| charts.par_iter().for_each(worker)),
            Err(e) => {
                tracing::warn!("Worker pool unavailable ({}), validating serially", e);
                charts.iter().for_each(worker);
            }
        }

        results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn validate_chart(&self, chart_dir: &Path, cache: Option<&ChartCache>) -> ChartResult {
        let digest =
            cache.map(|_| ChartCache::chart_digest(chart_dir, self.rule_set.fingerprint()));

        if let (Some(cache), Some(digest)) = (cache, &digest) {
            if let Some(cached) = cache.lookup(chart_dir, digest) {
                tracing::debug!("Cache hit for {}", chart_dir.display());
                return ChartResult {
                    chart: chart_dir.to_path_buf(),
                    digest: Some(digest.clone()),
                    violations: cached.to_vec(),
                    from_cache: true,
                };
            }
        }

        // A panic anywhere in the pipeline stays inside this chart's result
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.validate_chart_fresh(chart_dir)));
        let violations = match outcome {
            Ok(Ok(violations)) => violations,
            Ok(Err(e)) => vec![self.pipeline_failure(chart_dir, e)],
            Err(payload) => {
                let error = SentryError::evaluation(
                    VALIDATOR_ERROR_RULE,
                    format!("chart validation panicked: {}", panic_message(payload.as_ref())),
                );
                vec![self.pipeline_failure(chart_dir, error)]
            }
        };

        ChartResult { chart: chart_dir.to_path_buf(), digest, violations, from_cache: false }
    }

    fn pipeline_failure(&self, chart_dir: &Path, error: SentryError) -> Violation {
        tracing::error!("Chart {} failed: {}", chart_dir.display(), error);
        let (rule_id, rule_name) = match &error {
            SentryError::Render { .. } => (RENDER_FAILED_RULE, "chart failed to render"),
            _ => (VALIDATOR_ERROR_RULE, "internal validator failure"),
        };
        Violation::new(rule_id, Severity::Critical, chart_dir, error.to_string())
            .with_rule_name(rule_name)
    }

    fn validate_chart_fresh(&self, chart_dir: &Path) -> Result<Vec<Violation>, SentryError> {
        let outcome = self.renderer.render(
            chart_dir,
            &self.options.values,
            self.options.env.as_deref(),
        )?;

        let combined = match outcome {
            RenderOutcome::Rendered(text) => text,
            RenderOutcome::Failed(diagnostic) => {
                return Ok(vec![Violation::new(
                    RENDER_FAILED_RULE,
                    Severity::Critical,
                    chart_dir,
                    format!("chart failed to render: {}", diagnostic.trim()),
                )
                .with_rule_name("chart failed to render")]);
            }
        };

        let mut fragments = split_fragments(&combined);
        resolve_fragments(chart_dir, &mut fragments);

        let mut violations = Vec::new();
        for fragment in &fragments {
            if self.fragment_ignored(fragment) {
                continue;
            }
            let docs = parse_documents(&fragment.text);
            let mut found = self.engine.evaluate_fragment(
                chart_dir,
                fragment,
                docs.as_deref(),
                self.options.env.as_deref(),
            );
            for violation in &mut found {
                self.attach_lines(violation, fragment);
            }
            violations.extend(found);
        }
        Ok(violations)
    }

    fn fragment_ignored(&self, fragment: &RenderedFragment) -> bool {
        let name = fragment.display_name();
        self.rule_set.ignore_files.iter().any(|entry| name.contains(entry.as_str()))
    }

    /// Localize a pattern or forbidden-term violation by re-scanning its
    /// source template.
    fn attach_lines(&self, violation: &mut Violation, fragment: &RenderedFragment) {
        let Some(file) = &fragment.resolved_path else {
            return;
        };
        let needle = violation
            .details
            .get("pattern")
            .or_else(|| violation.details.get("term"))
            .and_then(|v| v.as_str());
        let Some(pattern) = needle else {
            return;
        };

        let hits = find_line_matches(file, pattern, &self.rule_set.ignore_variables);
        if let Some(first) = hits.first() {
            violation.set_location(first.line, first.snippet.as_str());
            violation.details.insert(
                "line_numbers".to_string(),
                serde_json::json!(hits.iter().map(|h| h.line).collect::<Vec<_>>()),
            );
        }
    }
}
