//! Dataset resolution and exclusion

use crate::storage::zfs::ZfsBackend;
use poolsync_common::Result;
use regex::Regex;
use tracing::debug;

/// Datasets matching any pattern are never snapshotted, sent, or pruned
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    patterns: Vec<Regex>,
}

impl ExclusionPolicy {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> std::result::Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Exclude nothing
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn is_excluded(&self, dataset: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(dataset))
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.as_str()).collect()
    }
}

impl Default for ExclusionPolicy {
    /// Swap volumes, matched anywhere in the name
    fn default() -> Self {
        Self {
            patterns: vec![Regex::new("swap").unwrap()],
        }
    }
}

/// Datasets to process, in order. An explicit list is used verbatim;
/// otherwise the direct children of `source` are listed and the pool prefix stripped.
pub async fn resolve_datasets(
    backend: &dyn ZfsBackend,
    source: &str,
    explicit: Option<&[String]>,
) -> Result<Vec<String>> {
    if let Some(datasets) = explicit {
        debug!(count = datasets.len(), "Using explicit dataset list");
        return Ok(datasets.to_vec());
    }

    let prefix = format!("{}/", source);
    let datasets: Vec<String> = backend
        .list_datasets(source)
        .await?
        .into_iter()
        .filter_map(|name| name.strip_prefix(&prefix).map(|ds| ds.to_string()))
        .filter(|ds| !ds.is_empty())
        .collect();

    debug!(pool = source, count = datasets.len(), "Discovered datasets");
    Ok(datasets)
}
