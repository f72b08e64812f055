//! Chart discovery
//!
//! A chart is any directory that directly contains a `Chart.yaml` manifest
//! declaration. Discovery is a plain recursive walk; finding nothing is a
//! clean, zero-violation run rather than an error.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File that marks a directory as a deployable chart
pub const CHART_MANIFEST: &str = "Chart.yaml";

/// Walk `root` and return every chart directory, sorted for deterministic
/// scheduling.
pub fn discover_charts<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let mut charts: Vec<PathBuf> = WalkDir::new(root.as_ref())
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.path().join(CHART_MANIFEST).is_file())
        .map(|e| e.into_path())
        .collect();
    charts.sort();
    charts
}

/// Whether a chart directory is excluded by the rule set's `ignore_charts`
/// list, which names chart directories by their final path segment.
pub fn is_ignored_chart(chart_dir: &Path, ignore_charts: &[String]) -> bool {
    chart_dir
        .file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            ignore_charts.iter().any(|ignored| ignored.as_str() == name.as_ref())
        })
        .unwrap_or(false)
}
