//! Best-effort line attribution
//!
//! Rendered text has no line correspondence with the template it came
//! from, so pattern violations are localized by re-scanning the source
//! template for the same pattern. Attribution is advisory: an unreadable
//! file or a pattern that only matches after rendering simply yields no
//! hits and the violation stays chart-level.

use crate::engine::compile_pattern;
use std::fs;
use std::path::Path;

/// One line of a source template matching a violation's pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineHit {
    /// 1-based line number
    pub line: u32,
    /// Trimmed content of the matching line
    pub snippet: String,
}

/// Scan `file` for lines matching `pattern` (case-insensitive, literal
/// fallback), skipping lines that contain an ignored template variable.
pub fn find_line_matches(file: &Path, pattern: &str, ignore_variables: &[String]) -> Vec<LineHit> {
    let Some(regex) = compile_pattern(pattern) else {
        return Vec::new();
    };
    let content = match fs::read(file) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!("Cannot re-scan {} for line numbers: {}", file.display(), e);
            return Vec::new();
        }
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            regex.is_match(line) && !ignore_variables.iter().any(|m| line.contains(m))
        })
        .map(|(index, line)| LineHit { line: (index + 1) as u32, snippet: line.trim().to_string() })
        .collect()
}
