//! Source splitting and structural loading of rendered output
//!
//! The templating tool interleaves every template of a chart into one
//! stream, tagging each span with a `# Source: <chart>/<path>` marker line.
//! The splitter recovers those spans as fragments, re-resolves them to
//! template files on disk, and the structural loader parses each fragment
//! as YAML when it can. Fragments that are not valid standalone YAML are
//! still evaluated by text-oriented rules.

use std::path::{Path, PathBuf};

/// Marker line prefix emitted by the templating tool
pub const SOURCE_MARKER: &str = "# Source:";

/// One contiguous span of rendered text attributable to a single source
/// template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFragment {
    /// Path exactly as emitted by the marker, typically prefixed with the
    /// chart's own directory name; `None` when content preceded any marker
    pub source_path: Option<String>,
    /// Raw rendered content of the span, marker lines excluded
    pub text: String,
    /// Marker path with the leading chart segment stripped
    pub relative_path: Option<String>,
    /// Absolute template path, set only when it exists under the chart dir
    pub resolved_path: Option<PathBuf>,
}

impl RenderedFragment {
    fn new(source_path: Option<String>) -> Self {
        Self { source_path, text: String::new(), relative_path: None, resolved_path: None }
    }

    /// Name used for attribution and applicability matching; unmarked
    /// content is grouped under "General".
    pub fn display_name(&self) -> &str {
        self.relative_path
            .as_deref()
            .or(self.source_path.as_deref())
            .unwrap_or("General")
    }

    /// Final path segment of the source template, used for env matching
    pub fn file_name(&self) -> &str {
        let name = self.display_name();
        name.rsplit('/').next().unwrap_or(name)
    }
}

/// Split combined rendered output into ordered fragments keyed by their
/// source markers. Joining the fragment texts back together reproduces the
/// non-marker content exactly.
pub fn split_fragments(combined: &str) -> Vec<RenderedFragment> {
    let mut fragments = Vec::new();
    let mut current = RenderedFragment::new(None);

    for line in combined.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(SOURCE_MARKER) {
            if current.source_path.is_some() || !current.text.trim().is_empty() {
                fragments.push(current);
            }
            current = RenderedFragment::new(Some(rest.trim().to_string()));
        } else {
            current.text.push_str(line);
            current.text.push('\n');
        }
    }
    if current.source_path.is_some() || !current.text.trim().is_empty() {
        fragments.push(current);
    }

    fragments
}

/// Resolve each fragment's marker path against the chart directory. Marker
/// paths carry the chart's directory name as their first segment; it is
/// stripped before probing the filesystem. Non-existent paths leave
/// `resolved_path` unset and the fragment degrades to chart-level
/// attribution.
pub fn resolve_fragments(chart_dir: &Path, fragments: &mut [RenderedFragment]) {
    for fragment in fragments {
        let Some(source) = fragment.source_path.as_deref() else {
            continue;
        };
        let relative = match source.split_once('/') {
            Some((_chart_segment, rest)) => rest,
            None => source,
        };
        fragment.relative_path = Some(relative.to_string());

        let candidate = chart_dir.join(relative);
        if candidate.is_file() {
            fragment.resolved_path = Some(candidate);
        } else {
            tracing::debug!(
                "Source marker '{}' does not resolve under {}",
                source,
                chart_dir.display()
            );
        }
    }
}

/// Permissively parse fragment text as a stream of YAML documents. Any
/// parse failure yields `None`; partial templates and values snippets are
/// routinely not valid standalone YAML and that is not an error.
pub fn parse_documents(text: &str) -> Option<Vec<serde_yaml::Value>> {
    use serde::Deserialize;

    let mut documents = Vec::new();
    for deserializer in serde_yaml::Deserializer::from_str(text) {
        match serde_yaml::Value::deserialize(deserializer) {
            Ok(serde_yaml::Value::Null) => {}
            Ok(value) => documents.push(value),
            Err(_) => return None,
        }
    }
    Some(documents)
}
