//! Rule evaluation over rendered fragments
//!
//! The engine owns the compiled rule list and dispatches each rule kind
//! against one fragment at a time. Evaluation is containment-first: a rule
//! that cannot run (bad quantity, failing plugin) reports that as a
//! violation and never aborts the chart.

pub mod path;
pub mod plugins;
pub mod units;

use crate::domain::violations::{Severity, Violation};
use crate::manifest::RenderedFragment;
use crate::rules::{Expect, NumericCheck, Rule, RuleKind, RuleSet};
use plugins::{PluginContext, PluginRegistry};
use regex::{Regex, RegexBuilder};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::Path;

/// Compile a rule pattern case-insensitively, degrading to a literal
/// substring match when the pattern is not valid regex syntax.
pub fn compile_pattern(pattern: &str) -> Option<Regex> {
    if let Ok(regex) = RegexBuilder::new(pattern).case_insensitive(true).build() {
        return Some(regex);
    }
    tracing::debug!("Pattern '{}' is not valid regex, matching literally", pattern);
    RegexBuilder::new(&regex::escape(pattern)).case_insensitive(true).build().ok()
}

/// Evaluates the loaded rule set against rendered fragments
pub struct RuleEngine {
    rules: Vec<Rule>,
    ignore_variables: Vec<String>,
    patterns: HashMap<String, Regex>,
    plugins: PluginRegistry,
}

impl RuleEngine {
    pub fn new(rule_set: &RuleSet, plugins: PluginRegistry) -> Self {
        let mut patterns = HashMap::new();
        for rule in &rule_set.rules {
            if let RuleKind::Pattern { pattern, .. } = &rule.kind {
                if let Some(regex) = compile_pattern(pattern) {
                    patterns.insert(rule.id.clone(), regex);
                }
            }
        }
        Self {
            rules: rule_set.rules.clone(),
            ignore_variables: rule_set.ignore_variables.clone(),
            patterns,
            plugins,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Run every applicable rule against one fragment. `docs` is `None`
    /// when the fragment was not parseable as YAML; structural rules are
    /// skipped in that case while text rules still run.
    pub fn evaluate_fragment(
        &self,
        chart_dir: &Path,
        fragment: &RenderedFragment,
        docs: Option<&[Value]>,
        env: Option<&str>,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            if !self.rule_applies(rule, fragment, env) {
                continue;
            }
            self.evaluate_rule(rule, chart_dir, fragment, docs, env, &mut violations);
        }
        violations
    }

    fn rule_applies(&self, rule: &Rule, fragment: &RenderedFragment, env: Option<&str>) -> bool {
        if let Some(globs) = &rule.applies_to {
            let name = fragment.display_name();
            let file_name = fragment.file_name();
            let matched = globs.iter().any(|g| match glob::Pattern::new(g) {
                Ok(pattern) => pattern.matches(name) || pattern.matches(file_name),
                Err(_) => {
                    tracing::debug!("Invalid applies_to glob '{}' on rule '{}'", g, rule.id);
                    false
                }
            });
            if !matched {
                return false;
            }
        }

        let file_name = fragment.file_name().to_lowercase();
        rule.env_match.iter().any(|token| {
            let token = token.to_lowercase();
            token == "all"
                || file_name.contains(&token)
                || env.map(|e| e.to_lowercase() == token).unwrap_or(false)
        })
    }

    fn evaluate_rule(
        &self,
        rule: &Rule,
        chart_dir: &Path,
        fragment: &RenderedFragment,
        docs: Option<&[Value]>,
        env: Option<&str>,
        violations: &mut Vec<Violation>,
    ) {
        match &rule.kind {
            RuleKind::Pattern { pattern, expect } => {
                self.check_pattern(rule, pattern, *expect, chart_dir, fragment, violations)
            }
            RuleKind::RequiredFields(fields) => {
                if let Some(docs) = docs {
                    self.check_required(rule, fields, docs, chart_dir, fragment, violations)
                }
            }
            RuleKind::DenyFields(fields) => {
                if let Some(docs) = docs {
                    self.check_denied(rule, fields, docs, chart_dir, fragment, violations)
                }
            }
            RuleKind::Numeric(check) => {
                if let Some(docs) = docs {
                    self.check_numeric(rule, check, docs, chart_dir, fragment, violations)
                }
            }
            RuleKind::AllowForbidden { allow, forbidden } => {
                self.check_forbidden_terms(rule, allow, forbidden, chart_dir, fragment, violations)
            }
            RuleKind::Plugin { plugin } => {
                self.check_plugin(rule, plugin, docs, chart_dir, fragment, env, violations)
            }
        }
    }

    fn base_violation(
        &self,
        rule: &Rule,
        chart_dir: &Path,
        fragment: &RenderedFragment,
        finding: String,
    ) -> Violation {
        let message = if rule.message.is_empty() { finding.clone() } else { rule.message.clone() };
        let mut violation = Violation::new(&rule.id, rule.severity, chart_dir, message)
            .with_rule_name(&rule.name)
            .with_suggestion(&rule.suggestion)
            .with_detail("source", serde_json::json!(fragment.display_name()));
        if !rule.message.is_empty() {
            violation = violation.with_detail("finding", serde_json::json!(finding));
        }
        if let Some(resolved) = &fragment.resolved_path {
            violation = violation.with_file(resolved);
        }
        violation
    }

    fn line_is_ignored(&self, line: &str) -> bool {
        self.ignore_variables.iter().any(|marker| line.contains(marker))
    }

    /// Forbidden patterns are scanned line by line so `ignore_variables`
    /// markers can suppress individual lines; a pattern that spans lines
    /// falls back to one whole-text match. Required patterns always scan
    /// the whole text.
    fn check_pattern(
        &self,
        rule: &Rule,
        pattern: &str,
        expect: Expect,
        chart_dir: &Path,
        fragment: &RenderedFragment,
        violations: &mut Vec<Violation>,
    ) {
        let Some(regex) = self.patterns.get(&rule.id) else {
            return;
        };

        match expect {
            Expect::Absent => {
                let matched: Vec<&str> = fragment
                    .text
                    .lines()
                    .filter(|line| regex.is_match(line) && !self.line_is_ignored(line))
                    .collect();
                if matched.is_empty() {
                    let spans_lines = pattern.contains('\n')
                        || pattern.contains("\\n")
                        || pattern.contains("(?s");
                    if spans_lines && regex.is_match(&fragment.text) {
                        violations.push(
                            self.base_violation(
                                rule,
                                chart_dir,
                                fragment,
                                format!("forbidden pattern '{pattern}' matched"),
                            )
                            .with_detail("pattern", serde_json::json!(pattern))
                            .with_detail("match_count", serde_json::json!(1)),
                        );
                    }
                    return;
                }
                // One violation per fragment regardless of match count
                let sample: Vec<&str> = matched.iter().take(5).copied().collect();
                violations.push(
                    self.base_violation(
                        rule,
                        chart_dir,
                        fragment,
                        format!("forbidden pattern '{pattern}' matched"),
                    )
                    .with_detail("pattern", serde_json::json!(pattern))
                    .with_detail("match_count", serde_json::json!(matched.len()))
                    .with_detail(
                        "matches",
                        serde_json::json!(sample
                            .iter()
                            .map(|l| l.trim())
                            .collect::<Vec<_>>()),
                    ),
                );
            }
            Expect::Present => {
                if regex.is_match(&fragment.text) {
                    return;
                }
                violations.push(
                    self.base_violation(
                        rule,
                        chart_dir,
                        fragment,
                        format!("required pattern '{pattern}' not found"),
                    )
                    .with_detail("pattern", serde_json::json!(pattern)),
                );
            }
        }
    }

    fn check_required(
        &self,
        rule: &Rule,
        fields: &[String],
        docs: &[Value],
        chart_dir: &Path,
        fragment: &RenderedFragment,
        violations: &mut Vec<Violation>,
    ) {
        for field in fields {
            if !path::exists_in_any(docs, field) {
                violations.push(
                    self.base_violation(
                        rule,
                        chart_dir,
                        fragment,
                        format!("required field '{field}' is missing"),
                    )
                    .with_detail("field", serde_json::json!(field)),
                );
            }
        }
    }

    fn check_denied(
        &self,
        rule: &Rule,
        fields: &[String],
        docs: &[Value],
        chart_dir: &Path,
        fragment: &RenderedFragment,
        violations: &mut Vec<Violation>,
    ) {
        for field in fields {
            if path::exists_in_any(docs, field) {
                violations.push(
                    self.base_violation(
                        rule,
                        chart_dir,
                        fragment,
                        format!("forbidden field '{field}' is present"),
                    )
                    .with_detail("field", serde_json::json!(field)),
                );
            }
        }
    }

    fn check_numeric(
        &self,
        rule: &Rule,
        check: &NumericCheck,
        docs: &[Value],
        chart_dir: &Path,
        fragment: &RenderedFragment,
        violations: &mut Vec<Violation>,
    ) {
        let mut found = false;

        for doc in docs {
            let Some(value) = path::lookup(doc, &check.key) else {
                continue;
            };
            found = true;
            let Some(actual) = path::scalar_text(value) else {
                violations.push(
                    self.base_violation(
                        rule,
                        chart_dir,
                        fragment,
                        format!("'{}' is not a scalar value", check.key),
                    )
                    .with_detail("field", serde_json::json!(&check.key)),
                );
                continue;
            };

            if let Some(max) = &check.max {
                self.check_bound(rule, check, &actual, max, Bound::Max, chart_dir, fragment, violations);
            }
            if let Some(min) = &check.min {
                self.check_bound(rule, check, &actual, min, Bound::Min, chart_dir, fragment, violations);
            }
            if let Some(min_field) = &check.min_field {
                match path::lookup(doc, min_field).and_then(path::scalar_text) {
                    Some(floor) => {
                        self.check_bound(
                            rule, check, &actual, &floor, Bound::Field(min_field.as_str()),
                            chart_dir, fragment, violations,
                        );
                    }
                    None => violations.push(
                        self.base_violation(
                            rule,
                            chart_dir,
                            fragment,
                            format!(
                                "'{}' cannot be compared: min_field '{}' not found",
                                check.key, min_field
                            ),
                        )
                        .with_detail("field", serde_json::json!(&check.key)),
                    ),
                }
            }
        }

        if !found {
            violations.push(
                self.base_violation(
                    rule,
                    chart_dir,
                    fragment,
                    format!("field '{}' not found in any document", check.key),
                )
                .with_detail("field", serde_json::json!(&check.key)),
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_bound(
        &self,
        rule: &Rule,
        check: &NumericCheck,
        actual: &str,
        bound: &str,
        kind: Bound,
        chart_dir: &Path,
        fragment: &RenderedFragment,
        violations: &mut Vec<Violation>,
    ) {
        let (actual_n, bound_n, _family) = match units::comparable_pair(actual, bound) {
            Ok(pair) => pair,
            Err(message) => {
                violations.push(
                    self.base_violation(
                        rule,
                        chart_dir,
                        fragment,
                        format!("'{}' cannot be compared: {message}", check.key),
                    )
                    .with_detail("field", serde_json::json!(&check.key))
                    .with_detail("value", serde_json::json!(actual)),
                );
                return;
            }
        };

        let finding = match kind {
            Bound::Max if actual_n > bound_n => {
                format!("'{}' is {actual}, exceeds maximum {bound}", check.key)
            }
            Bound::Min if actual_n < bound_n => {
                format!("'{}' is {actual}, below minimum {bound}", check.key)
            }
            Bound::Field(field) if actual_n < bound_n => {
                format!("'{}' is {actual}, below '{field}' ({bound})", check.key)
            }
            _ => return,
        };

        violations.push(
            self.base_violation(rule, chart_dir, fragment, finding)
                .with_detail("field", serde_json::json!(&check.key))
                .with_detail("value", serde_json::json!(actual))
                .with_detail("bound", serde_json::json!(bound)),
        );
    }

    fn check_forbidden_terms(
        &self,
        rule: &Rule,
        allow: &[String],
        forbidden: &[String],
        chart_dir: &Path,
        fragment: &RenderedFragment,
        violations: &mut Vec<Violation>,
    ) {
        let haystack = fragment.text.to_lowercase();
        for term in forbidden {
            let term_lower = term.to_lowercase();
            let mut occurrences = haystack.matches(&term_lower).count();
            if occurrences == 0 {
                continue;
            }
            // Occurrences inside an allowed superstring are tolerated
            for allowed in allow {
                let allowed_lower = allowed.to_lowercase();
                if allowed_lower.contains(&term_lower) {
                    occurrences =
                        occurrences.saturating_sub(haystack.matches(&allowed_lower).count());
                }
            }
            if occurrences > 0 {
                violations.push(
                    self.base_violation(
                        rule,
                        chart_dir,
                        fragment,
                        format!("forbidden term '{term}' found"),
                    )
                    .with_detail("term", serde_json::json!(term))
                    .with_detail("occurrences", serde_json::json!(occurrences)),
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_plugin(
        &self,
        rule: &Rule,
        plugin: &str,
        docs: Option<&[Value]>,
        chart_dir: &Path,
        fragment: &RenderedFragment,
        env: Option<&str>,
        violations: &mut Vec<Violation>,
    ) {
        let context = PluginContext {
            chart_dir,
            fragment_name: fragment.display_name(),
            env,
        };
        let docs = docs.unwrap_or(&[]);

        match self.plugins.run(plugin, docs, &context, rule) {
            Ok(outcome) if outcome.passed => {}
            Ok(outcome) => {
                let mut violation =
                    self.base_violation(rule, chart_dir, fragment, outcome.message);
                violation.details.extend(outcome.details);
                violations.push(violation);
            }
            // A plugin that cannot run is a validator failure, always critical
            Err(e) => {
                let mut violation = self.base_violation(rule, chart_dir, fragment, e.to_string());
                violation.severity = Severity::Critical;
                violation.message = e.to_string();
                violations.push(
                    violation.with_detail("plugin", serde_json::json!(plugin)),
                );
            }
        }
    }
}

enum Bound<'a> {
    Min,
    Max,
    Field(&'a str),
}
