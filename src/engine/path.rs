//! Dotted-path lookup over parsed YAML documents
//!
//! Field rules address values with paths like
//! `spec.template.spec.containers[].resources.limits.cpu`. A `[]` suffix
//! steps into the first element of a sequence; later elements are not
//! visited.

use serde_yaml::Value;

/// Look up `path` in `doc`. Returns `None` when any segment is missing or
/// the value shape does not match the path.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        let (key, indexed) = match segment.strip_suffix("[]") {
            Some(key) => (key, true),
            None => (segment, false),
        };
        current = current.get(key)?;
        if indexed {
            current = current.as_sequence()?.first()?;
        }
    }
    Some(current)
}

/// Whether `path` resolves to a present, non-null value in any document
pub fn exists_in_any(docs: &[Value], path: &str) -> bool {
    docs.iter()
        .any(|doc| lookup(doc, path).map(|v| !v.is_null()).unwrap_or(false))
}

/// Render a looked-up scalar as text for numeric parsing and messages
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_plain_nested_lookup() {
        let doc = doc("spec:\n  replicas: 3\n");
        assert_eq!(lookup(&doc, "spec.replicas"), Some(&Value::from(3)));
    }

    #[test]
    fn test_array_segment_visits_first_element_only() {
        let doc = doc(
            "spec:\n  containers:\n    - name: app\n      image: nginx\n    - name: sidecar\n",
        );
        let first = lookup(&doc, "spec.containers[].name").unwrap();
        assert_eq!(first, &Value::from("app"));
        // the sidecar's missing image is invisible to the lookup
        assert!(lookup(&doc, "spec.containers[].image").is_some());
    }

    #[test]
    fn test_missing_segment_is_none() {
        let doc = doc("spec:\n  replicas: 3\n");
        assert_eq!(lookup(&doc, "spec.strategy.type"), None);
        assert_eq!(lookup(&doc, "metadata"), None);
    }

    #[test]
    fn test_array_suffix_on_non_sequence_is_none() {
        let doc = doc("spec:\n  replicas: 3\n");
        assert_eq!(lookup(&doc, "spec.replicas[]"), None);
    }

    #[test]
    fn test_exists_in_any_scans_documents() {
        let docs = vec![doc("kind: Service\n"), doc("spec:\n  replicas: 2\n")];
        assert!(exists_in_any(&docs, "spec.replicas"));
        assert!(!exists_in_any(&docs, "spec.selector"));
    }

    #[test]
    fn test_null_value_does_not_count_as_present() {
        let docs = vec![doc("spec:\n  selector: null\n")];
        assert!(!exists_in_any(&docs, "spec.selector"));
    }

    #[test]
    fn test_scalar_text_conversions() {
        assert_eq!(scalar_text(&Value::from("500m")).as_deref(), Some("500m"));
        assert_eq!(scalar_text(&Value::from(3)).as_deref(), Some("3"));
        assert_eq!(scalar_text(&doc("a: 1")), None);
    }
}
