//! Named plugin checks
//!
//! A plugin is a callback dispatched by `type: plugin` rules against the
//! parsed documents of a fragment. Built-in plugins cover the workload
//! checks that need to correlate several fields at once; callers can
//! register their own under new names. A plugin that fails to run (or is
//! not registered at all) is a validator failure and is escalated to
//! critical by the engine, whatever the rule declares.

use crate::domain::violations::{SentryError, SentryResult};
use crate::rules::Rule;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

/// Context handed to every plugin invocation
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    pub chart_dir: &'a Path,
    /// Chart-relative name of the fragment under evaluation
    pub fragment_name: &'a str,
    pub env: Option<&'a str>,
}

/// What a plugin concluded about one fragment
#[derive(Debug, Clone)]
pub struct PluginOutcome {
    pub passed: bool,
    pub message: String,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl PluginOutcome {
    pub fn pass() -> Self {
        Self { passed: true, message: String::new(), details: BTreeMap::new() }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { passed: false, message: message.into(), details: BTreeMap::new() }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

type PluginFn =
    Arc<dyn Fn(&[Value], &PluginContext, &Rule) -> SentryResult<PluginOutcome> + Send + Sync>;

/// Name-indexed set of plugin callbacks
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginFn>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("PluginRegistry").field("plugins", &names).finish()
    }
}

impl PluginRegistry {
    /// Registry pre-loaded with the built-in workload checks
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("minimum_replicas", minimum_replicas);
        registry.register("liveness_probe", liveness_probe);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, plugin: F)
    where
        F: Fn(&[Value], &PluginContext, &Rule) -> SentryResult<PluginOutcome>
            + Send
            + Sync
            + 'static,
    {
        self.plugins.insert(name.into(), Arc::new(plugin));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Run the named plugin. An unknown name is an evaluation error so the
    /// engine can escalate it, and a callback that panics is caught and
    /// reported the same way instead of unwinding through the worker pool.
    pub fn run(
        &self,
        name: &str,
        docs: &[Value],
        context: &PluginContext,
        rule: &Rule,
    ) -> SentryResult<PluginOutcome> {
        let plugin = self.plugins.get(name).ok_or_else(|| {
            SentryError::evaluation(&rule.id, format!("plugin '{name}' is not registered"))
        })?;
        panic::catch_unwind(AssertUnwindSafe(|| plugin(docs, context, rule))).unwrap_or_else(
            |payload| {
                Err(SentryError::evaluation(
                    &rule.id,
                    format!("plugin '{name}' panicked: {}", panic_message(payload.as_ref())),
                ))
            },
        )
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn doc_kind(doc: &Value) -> Option<&str> {
    doc.get("kind").and_then(Value::as_str)
}

fn is_workload(doc: &Value) -> bool {
    matches!(doc_kind(doc), Some("Deployment") | Some("StatefulSet") | Some("ReplicaSet"))
}

/// Workloads must request at least two replicas so a node drain cannot
/// take the service down.
fn minimum_replicas(
    docs: &[Value],
    _context: &PluginContext,
    _rule: &Rule,
) -> SentryResult<PluginOutcome> {
    for doc in docs {
        if !is_workload(doc) {
            continue;
        }
        let Some(replicas) = doc.get("spec").and_then(|s| s.get("replicas")) else {
            continue;
        };
        let count = replicas.as_i64().unwrap_or(0);
        if count < 2 {
            let name = doc
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("unnamed");
            return Ok(PluginOutcome::fail(format!(
                "{} '{}' runs {} replica(s); at least 2 are required",
                doc_kind(doc).unwrap_or("workload"),
                name,
                count
            ))
            .with_detail("replicas", serde_json::json!(count)));
        }
    }
    Ok(PluginOutcome::pass())
}

/// Every container of a workload must declare a liveness probe
fn liveness_probe(
    docs: &[Value],
    _context: &PluginContext,
    _rule: &Rule,
) -> SentryResult<PluginOutcome> {
    for doc in docs {
        if !matches!(
            doc_kind(doc),
            Some("Deployment") | Some("StatefulSet") | Some("DaemonSet")
        ) {
            continue;
        }
        let containers = doc
            .get("spec")
            .and_then(|s| s.get("template"))
            .and_then(|t| t.get("spec"))
            .and_then(|s| s.get("containers"))
            .and_then(Value::as_sequence);
        let Some(containers) = containers else { continue };

        for container in containers {
            if container.get("livenessProbe").is_none() {
                let name = container
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unnamed");
                return Ok(PluginOutcome::fail(format!(
                    "container '{name}' has no livenessProbe"
                ))
                .with_detail("container", serde_json::json!(name)));
            }
        }
    }
    Ok(PluginOutcome::pass())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::violations::Severity;
    use crate::rules::RuleKind;

    fn plugin_rule(name: &str) -> Rule {
        Rule {
            id: format!("{name}-rule"),
            name: name.to_string(),
            severity: Severity::Error,
            message: String::new(),
            suggestion: String::new(),
            applies_to: None,
            env_match: vec!["all".to_string()],
            kind: RuleKind::Plugin { plugin: name.to_string() },
        }
    }

    fn context() -> PluginContext<'static> {
        PluginContext { chart_dir: Path::new("charts/api"), fragment_name: "General", env: None }
    }

    fn docs(yaml: &str) -> Vec<Value> {
        crate::manifest::parse_documents(yaml).unwrap()
    }

    #[test]
    fn test_minimum_replicas_flags_single_replica() {
        let registry = PluginRegistry::with_builtins();
        let docs = docs(
            "kind: Deployment\nmetadata:\n  name: api\nspec:\n  replicas: 1\n",
        );

        let outcome = registry
            .run("minimum_replicas", &docs, &context(), &plugin_rule("minimum_replicas"))
            .unwrap();

        assert!(!outcome.passed);
        assert!(outcome.message.contains("api"));
        assert_eq!(outcome.details["replicas"], serde_json::json!(1));
    }

    #[test]
    fn test_minimum_replicas_passes_non_workloads() {
        let registry = PluginRegistry::with_builtins();
        let docs = docs("kind: Service\nspec:\n  type: ClusterIP\n");

        let outcome = registry
            .run("minimum_replicas", &docs, &context(), &plugin_rule("minimum_replicas"))
            .unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn test_liveness_probe_names_the_offending_container() {
        let registry = PluginRegistry::with_builtins();
        let docs = docs(
            r#"
kind: Deployment
spec:
  template:
    spec:
      containers:
        - name: app
          livenessProbe:
            httpGet: {path: /healthz, port: 8080}
        - name: sidecar
"#,
        );

        let outcome = registry
            .run("liveness_probe", &docs, &context(), &plugin_rule("liveness_probe"))
            .unwrap();

        assert!(!outcome.passed);
        assert!(outcome.message.contains("sidecar"));
    }

    #[test]
    fn test_unregistered_plugin_is_an_error() {
        let registry = PluginRegistry::with_builtins();
        let result = registry.run("no-such-plugin", &[], &context(), &plugin_rule("x"));

        assert!(matches!(result, Err(SentryError::Evaluation { .. })));
    }

    #[test]
    fn test_panicking_plugin_is_contained_as_an_error() {
        let mut registry = PluginRegistry::with_builtins();
        registry.register("explodes", |_docs, _ctx, _rule| -> SentryResult<PluginOutcome> {
            panic!("plugin blew up")
        });

        let result = registry.run("explodes", &[], &context(), &plugin_rule("explodes"));

        let err = result.unwrap_err();
        assert!(matches!(err, SentryError::Evaluation { .. }));
        assert!(err.to_string().contains("plugin blew up"));
    }

    #[test]
    fn test_custom_plugin_registration() {
        let mut registry = PluginRegistry::with_builtins();
        registry.register("always_fail", |_docs, _ctx, _rule| {
            Ok(PluginOutcome::fail("nope"))
        });

        let outcome =
            registry.run("always_fail", &[], &context(), &plugin_rule("always_fail")).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.message, "nope");
    }
}
