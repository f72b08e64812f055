//! Rule model and repository
//!
//! Rule sources are YAML files (or directories of them) whose documents may
//! be a bare list of rules, a mapping with a `rules` key plus optional
//! ignore lists, or a multi-document stream. All shapes merge into one
//! ordered list. Loading fails open per malformed file, but a malformed
//! *rule* is surfaced as a critical load violation rather than dropped.

use crate::domain::violations::{Severity, Violation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Whether a pattern is expected to be absent (forbidden) or present
/// (required) in the rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expect {
    Present,
    Absent,
}

impl Default for Expect {
    fn default() -> Self {
        // Rules default to forbidding their pattern
        Self::Absent
    }
}

/// Unit-aware range check of a dotted-path scalar
#[derive(Debug, Clone, PartialEq)]
pub struct NumericCheck {
    pub key: String,
    pub min: Option<String>,
    pub max: Option<String>,
    /// Compare against another dotted path in the same document instead of
    /// a literal minimum
    pub min_field: Option<String>,
}

/// The behavioral payload of a rule, discriminated by the YAML `type` field
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Regex (literal fallback) over the raw rendered text of a fragment
    Pattern { pattern: String, expect: Expect },
    /// Dotted paths that must resolve in at least one parsed document
    RequiredFields(Vec<String>),
    /// Dotted paths that must not resolve in any parsed document
    DenyFields(Vec<String>),
    /// Range check of a numeric quantity (CPU, memory or plain integer)
    Numeric(NumericCheck),
    /// Case-insensitive forbidden-term scan over the rendered text
    AllowForbidden { allow: Vec<String>, forbidden: Vec<String> },
    /// Dispatch to a named callback in the plugin registry
    Plugin { plugin: String },
}

impl RuleKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Pattern { .. } => "pattern",
            Self::RequiredFields(_) => "required_fields",
            Self::DenyFields(_) => "deny_fields",
            Self::Numeric(_) => "numeric_check",
            Self::AllowForbidden { .. } => "allow_forbidden",
            Self::Plugin { .. } => "plugin",
        }
    }
}

/// A single validation rule, immutable once loaded
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
    /// Glob patterns matched against the fragment's chart-relative path;
    /// `None` means the rule applies to all files
    pub applies_to: Option<Vec<String>>,
    /// Environment tokens matched case-insensitively against the file name;
    /// `all` always matches
    pub env_match: Vec<String>,
    pub kind: RuleKind,
}

/// The merged, ordered rule list plus the ignore lists consulted by the
/// chart locator and the evaluator.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub ignore_files: Vec<String>,
    pub ignore_charts: Vec<String>,
    pub ignore_variables: Vec<String>,
    /// Violations produced while loading (malformed or unknown-type rules)
    pub load_violations: Vec<Violation>,
    fingerprint: String,
    next_position: usize,
}

/// Raw on-disk shape of a rule before payload resolution
#[derive(Debug, Deserialize)]
struct RawRule {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    severity: Option<Severity>,
    #[serde(default)]
    suggestion: String,
    #[serde(default)]
    message: String,
    #[serde(default = "default_true")]
    enabled: bool,
    applies_to: Option<Vec<String>>,
    env_match: Option<Vec<String>>,
    pattern: Option<String>,
    expect: Option<Expect>,
    required_fields: Option<Vec<String>>,
    deny_fields: Option<Vec<String>>,
    numeric_check: Option<RawNumericCheck>,
    plugin: Option<String>,
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    forbidden: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawNumericCheck {
    key: String,
    min: Option<serde_yaml::Value>,
    max: Option<serde_yaml::Value>,
    min_field: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Render a YAML scalar (string or number) as the comparison string the
/// quantity parser understands.
fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl RuleSet {
    /// Load and merge rule definitions from one or more files or
    /// directories. Directories are searched recursively for `*.yml` and
    /// `*.yaml`, in sorted order so merging is deterministic.
    pub fn load<P: AsRef<Path>>(sources: &[P]) -> Self {
        let mut set = RuleSet::default();
        let mut hasher = Sha256::new();

        for source in sources {
            let source = source.as_ref();
            if source.is_dir() {
                for path in rule_files_in(source) {
                    set.load_file(&path, &mut hasher);
                }
            } else {
                set.load_file(source, &mut hasher);
            }
        }

        set.fingerprint = format!("{:x}", hasher.finalize());
        set
    }

    /// Content fingerprint of everything that was loaded, used to key the
    /// validation cache and stamp the report.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn load_file(&mut self, path: &Path, hasher: &mut Sha256) {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Skipping unreadable rule file {}: {}", path.display(), e);
                return;
            }
        };
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(content.as_bytes());

        // Multi-document streams are valid rule sources
        for document in serde_yaml::Deserializer::from_str(&content) {
            match serde_yaml::Value::deserialize(document) {
                Ok(value) => self.absorb_document(value, path),
                Err(e) => {
                    tracing::warn!("Skipping malformed rule file {}: {}", path.display(), e);
                    return;
                }
            }
        }
    }

    fn absorb_document(&mut self, value: serde_yaml::Value, origin: &Path) {
        match value {
            serde_yaml::Value::Sequence(items) => {
                for item in items {
                    self.absorb_rule(item, origin);
                }
            }
            serde_yaml::Value::Mapping(mut mapping) => {
                let rules = mapping.remove("rules");
                self.extend_ignore_list("ignore_files", &mut mapping);
                self.extend_ignore_list("ignore_charts", &mut mapping);
                self.extend_ignore_list("ignore_variables", &mut mapping);

                match rules {
                    Some(serde_yaml::Value::Sequence(items)) => {
                        for item in items {
                            self.absorb_rule(item, origin);
                        }
                    }
                    Some(other) => self.absorb_rule(other, origin),
                    // A mapping without a `rules` key is a single rule object
                    None => self.absorb_rule(serde_yaml::Value::Mapping(mapping), origin),
                }
            }
            serde_yaml::Value::Null => {}
            other => {
                tracing::warn!(
                    "Ignoring unexpected top-level {:?} document in {}",
                    other,
                    origin.display()
                );
            }
        }
    }

    fn extend_ignore_list(&mut self, key: &str, mapping: &mut serde_yaml::Mapping) {
        if let Some(serde_yaml::Value::Sequence(items)) = mapping.remove(key) {
            let target = match key {
                "ignore_files" => &mut self.ignore_files,
                "ignore_charts" => &mut self.ignore_charts,
                _ => &mut self.ignore_variables,
            };
            target.extend(items.into_iter().filter_map(|v| scalar_to_string(&v)));
        }
    }

    fn absorb_rule(&mut self, value: serde_yaml::Value, origin: &Path) {
        let position = self.next_position;
        self.next_position += 1;
        let fallback_id = format!("rule-{position}");

        let raw: RawRule = match serde_yaml::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.push_load_violation(
                    fallback_id,
                    origin,
                    format!("malformed rule definition: {e}"),
                );
                return;
            }
        };

        if !raw.enabled {
            return;
        }

        let id = raw.id.clone().unwrap_or(fallback_id);
        let kind = match self.resolve_kind(&raw) {
            Ok(kind) => kind,
            Err(message) => {
                self.push_load_violation(id, origin, message);
                return;
            }
        };

        self.rules.push(Rule {
            name: raw.name.unwrap_or_else(|| id.clone()),
            id,
            severity: raw.severity.unwrap_or_default(),
            message: raw.message,
            suggestion: raw.suggestion,
            applies_to: raw.applies_to,
            env_match: raw.env_match.unwrap_or_else(|| vec!["all".to_string()]),
            kind,
        });
    }

    /// Resolve the tagged payload; unknown or inconsistent shapes are
    /// reported at load time, never deferred to evaluation.
    fn resolve_kind(&self, raw: &RawRule) -> Result<RuleKind, String> {
        let type_name = raw.kind.as_deref().ok_or_else(|| "rule has no type".to_string())?;

        match type_name {
            "pattern" => {
                let pattern = raw
                    .pattern
                    .clone()
                    .ok_or_else(|| "pattern rule is missing its pattern".to_string())?;
                Ok(RuleKind::Pattern { pattern, expect: raw.expect.unwrap_or_default() })
            }
            "required_fields" => {
                let fields = raw
                    .required_fields
                    .clone()
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| "required_fields rule lists no fields".to_string())?;
                Ok(RuleKind::RequiredFields(fields))
            }
            "deny_fields" => {
                let fields = raw
                    .deny_fields
                    .clone()
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| "deny_fields rule lists no fields".to_string())?;
                Ok(RuleKind::DenyFields(fields))
            }
            "numeric_check" => {
                let raw_check = raw
                    .numeric_check
                    .as_ref()
                    .ok_or_else(|| "numeric_check rule has no numeric_check block".to_string())?;
                Ok(RuleKind::Numeric(NumericCheck {
                    key: raw_check.key.clone(),
                    min: raw_check.min.as_ref().and_then(scalar_to_string),
                    max: raw_check.max.as_ref().and_then(scalar_to_string),
                    min_field: raw_check.min_field.clone(),
                }))
            }
            "allow_forbidden" => {
                if raw.forbidden.is_empty() {
                    return Err("allow_forbidden rule lists no forbidden terms".to_string());
                }
                Ok(RuleKind::AllowForbidden {
                    allow: raw.allow.clone(),
                    forbidden: raw.forbidden.clone(),
                })
            }
            "plugin" => {
                let plugin = raw
                    .plugin
                    .clone()
                    .ok_or_else(|| "plugin rule does not name a plugin".to_string())?;
                Ok(RuleKind::Plugin { plugin })
            }
            other => Err(format!("unknown rule type: {other}")),
        }
    }

    fn push_load_violation(&mut self, rule_id: String, origin: &Path, message: String) {
        tracing::warn!("Rule '{}' in {} rejected: {}", rule_id, origin.display(), message);
        self.load_violations.push(
            Violation::new(rule_id, Severity::Critical, origin, message)
                .with_rule_name("rule definition rejected at load")
                .with_file(origin),
        );
    }
}

fn rule_files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| {
            p.is_file()
                && matches!(p.extension().and_then(|s| s.to_str()), Some("yml") | Some("yaml"))
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn load_str(content: &str) -> RuleSet {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rules.yaml");
        fs::write(&path, content).unwrap();
        RuleSet::load(&[path])
    }

    #[test]
    fn test_bare_list_of_rules() {
        let set = load_str(
            r#"
- id: no-latest
  type: pattern
  pattern: ":latest"
  severity: error
- id: cpu-cap
  type: numeric_check
  numeric_check:
    key: resources.limits.cpu
    max: "4"
"#,
        );

        assert_eq!(set.rules.len(), 2);
        assert!(set.load_violations.is_empty());
        assert_eq!(set.rules[0].id, "no-latest");
        assert_eq!(set.rules[0].severity, Severity::Error);
        assert_eq!(
            set.rules[1].kind,
            RuleKind::Numeric(NumericCheck {
                key: "resources.limits.cpu".to_string(),
                min: None,
                max: Some("4".to_string()),
                min_field: None,
            })
        );
    }

    #[test]
    fn test_rules_key_with_ignore_lists() {
        let set = load_str(
            r#"
ignore_files: ["charts/legacy"]
ignore_charts: ["sandbox"]
ignore_variables: ["{{ .Values"]
rules:
  - id: deny-password
    type: deny_fields
    deny_fields: ["credentials.password"]
"#,
        );

        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.ignore_files, vec!["charts/legacy"]);
        assert_eq!(set.ignore_charts, vec!["sandbox"]);
        assert_eq!(set.ignore_variables, vec!["{{ .Values"]);
    }

    #[test]
    fn test_multi_document_stream() {
        let set = load_str(
            r#"
id: first
type: pattern
pattern: "foo"
---
- id: second
  type: pattern
  pattern: "bar"
  expect: present
"#,
        );

        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.rules[0].id, "first");
        assert_eq!(
            set.rules[1].kind,
            RuleKind::Pattern { pattern: "bar".to_string(), expect: Expect::Present }
        );
    }

    #[test]
    fn test_disabled_rules_dropped_at_load() {
        let set = load_str(
            r#"
- id: off
  type: pattern
  pattern: "x"
  enabled: false
- id: on
  type: pattern
  pattern: "y"
"#,
        );

        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].id, "on");
        assert!(set.load_violations.is_empty());
    }

    #[test]
    fn test_unknown_type_is_reported_not_dropped() {
        let set = load_str(
            r#"
- id: mystery
  type: jsonpath_query
  pattern: "x"
"#,
        );

        assert!(set.rules.is_empty());
        assert_eq!(set.load_violations.len(), 1);
        assert_eq!(set.load_violations[0].rule_id, "mystery");
        assert_eq!(set.load_violations[0].severity, Severity::Critical);
        assert!(set.load_violations[0].message.contains("unknown rule type"));
    }

    #[test]
    fn test_missing_type_is_reported() {
        let set = load_str("- id: untyped\n  pattern: x\n");

        assert!(set.rules.is_empty());
        assert_eq!(set.load_violations.len(), 1);
        assert!(set.load_violations[0].message.contains("no type"));
    }

    #[test]
    fn test_positional_id_and_default_severity() {
        let set = load_str("- type: pattern\n  pattern: x\n");

        assert_eq!(set.rules[0].id, "rule-0");
        assert_eq!(set.rules[0].name, "rule-0");
        assert_eq!(set.rules[0].severity, Severity::Warning);
        assert_eq!(set.rules[0].env_match, vec!["all"]);
    }

    #[test]
    fn test_malformed_file_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let bad = temp_dir.path().join("bad.yaml");
        let good = temp_dir.path().join("good.yaml");
        fs::write(&bad, ": not : valid : yaml : [").unwrap();
        fs::write(&good, "- id: ok\n  type: pattern\n  pattern: x\n").unwrap();

        let set = RuleSet::load(&[temp_dir.path().to_path_buf()]);

        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].id, "ok");
    }

    #[test]
    fn test_directory_merge_preserves_sorted_file_order() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.yaml"), "- id: late\n  type: pattern\n  pattern: x\n")
            .unwrap();
        fs::write(temp_dir.path().join("a.yaml"), "- id: early\n  type: pattern\n  pattern: x\n")
            .unwrap();

        let set = RuleSet::load(&[temp_dir.path().to_path_buf()]);

        assert_eq!(set.rules[0].id, "early");
        assert_eq!(set.rules[1].id, "late");
    }

    #[test]
    fn test_numeric_bounds_accept_yaml_numbers() {
        let set = load_str(
            r#"
- id: replicas
  type: numeric_check
  numeric_check:
    key: replicaCount
    min: 3
"#,
        );

        match &set.rules[0].kind {
            RuleKind::Numeric(check) => assert_eq!(check.min.as_deref(), Some("3")),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rules.yaml");
        fs::write(&path, "- id: a\n  type: pattern\n  pattern: x\n").unwrap();

        let first = RuleSet::load(&[&path]);
        let second = RuleSet::load(&[&path]);
        assert_eq!(first.fingerprint(), second.fingerprint());

        fs::write(&path, "- id: b\n  type: pattern\n  pattern: y\n").unwrap();
        let third = RuleSet::load(&[&path]);
        assert_ne!(first.fingerprint(), third.fingerprint());
    }
}
