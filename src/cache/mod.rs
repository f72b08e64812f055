//! Persistent validation cache
//!
//! A chart whose template sources and rule set are unchanged since the
//! last run re-emits its recorded violations without rendering. The cache
//! key hashes every YAML and template file under the chart plus the rule
//! set fingerprint, so touching either side invalidates the entry. A
//! corrupt or missing cache file is treated as empty.

use crate::domain::violations::{SentryError, SentryResult, Violation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    digest: String,
    violations: Vec<Violation>,
    cached_at: DateTime<Utc>,
}

/// Digest-keyed record of per-chart validation results
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChartCache {
    entries: HashMap<String, CacheEntry>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl ChartCache {
    /// Load the cache from `path`, starting empty when the file is absent
    /// or unreadable as JSON.
    pub fn load<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let mut cache = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<ChartCache>(&content).unwrap_or_else(|e| {
                tracing::warn!("Discarding corrupt cache {}: {}", path.display(), e);
                ChartCache::default()
            }),
            Err(_) => ChartCache::default(),
        };
        cache.path = Some(path);
        cache
    }

    /// Content digest of a chart's template sources combined with the rule
    /// set fingerprint. Unreadable files are skipped so a permissions
    /// hiccup degrades to a cache miss at worst.
    pub fn chart_digest(chart_dir: &Path, rules_fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(rules_fingerprint.as_bytes());

        let mut files: Vec<PathBuf> = WalkDir::new(chart_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|s| s.to_str()),
                        Some("yaml") | Some("yml") | Some("tpl")
                    )
            })
            .collect();
        files.sort();

        for file in files {
            hasher.update(file.to_string_lossy().as_bytes());
            if let Ok(content) = fs::read(&file) {
                hasher.update(&content);
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Cached violations for `chart_dir`, if its digest still matches
    pub fn lookup(&self, chart_dir: &Path, digest: &str) -> Option<&[Violation]> {
        self.entries
            .get(&cache_key(chart_dir))
            .filter(|entry| entry.digest == digest)
            .map(|entry| entry.violations.as_slice())
    }

    pub fn store(&mut self, chart_dir: &Path, digest: String, violations: Vec<Violation>) {
        self.entries.insert(
            cache_key(chart_dir),
            CacheEntry { digest, violations, cached_at: Utc::now() },
        );
    }

    /// Persist the cache to the path it was loaded from
    pub fn save(&self) -> SentryResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SentryError::cache(format!("cannot serialize cache: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn cache_key(chart_dir: &Path) -> String {
    chart_dir.to_string_lossy().into_owned()
}
