//! Archive file filtering using globset

use std::path::Path;
use serde::{Deserialize, Serialize};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{Result, SyncError};
use crate::layout::{ASSET_EXTENSIONS, SIDECAR_SUFFIX};

/// Archive filter options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOptions {
    /// Patterns a file must match to count as archived (if empty, include all)
    pub include_patterns: Vec<String>,
    /// Patterns that are never archived content
    pub exclude_patterns: Vec<String>,
    /// Case sensitive matching
    pub case_sensitive: bool,
    /// Include hidden files (starting with .)
    pub include_hidden: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        let mut include_patterns: Vec<String> = ASSET_EXTENSIONS
            .iter()
            .map(|ext| format!("**/*.{}", ext))
            .collect();
        include_patterns.push(format!("**/*{}", SIDECAR_SUFFIX));

        Self {
            include_patterns,
            exclude_patterns: vec![
                "**/*.part".to_string(),
                "**/*.tmp".to_string(),
                "**/*.crdownload".to_string(),
            ],
            case_sensitive: false,
            include_hidden: false,
        }
    }
}

/// Decides which files under a source directory are archive content
#[derive(Debug, Clone)]
pub struct ArchiveFilter {
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
    options: FilterOptions,
}

impl ArchiveFilter {
    /// Create a new filter with the given options
    pub fn new(options: FilterOptions) -> Result<Self> {
        let include_set = if options.include_patterns.is_empty() {
            None
        } else {
            Some(Self::build_globset(&options.include_patterns, options.case_sensitive)?)
        };

        let exclude_set = if options.exclude_patterns.is_empty() {
            None
        } else {
            Some(Self::build_globset(&options.exclude_patterns, options.case_sensitive)?)
        };

        Ok(Self {
            include_set,
            exclude_set,
            options,
        })
    }

    /// Check a path relative to the source directory
    pub fn should_include(&self, path: &Path) -> bool {
        if !self.options.include_hidden && is_hidden(path) {
            return false;
        }

        if let Some(exclude_set) = &self.exclude_set {
            if exclude_set.is_match(path) {
                return false;
            }
        }

        match &self.include_set {
            Some(include_set) => include_set.is_match(path),
            None => true,
        }
    }

    /// Whether the path names a sidecar metadata file
    pub fn is_sidecar(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with(SIDECAR_SUFFIX))
            .unwrap_or(false)
    }

    fn build_globset(patterns: &[String], case_sensitive: bool) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let mut glob = GlobBuilder::new(pattern);
            glob.literal_separator(false);

            if !case_sensitive {
                glob.case_insensitive(true);
            }

            let compiled_glob = glob.build().map_err(|e| {
                SyncError::FilterPattern(format!("Failed to compile glob '{}': {}", pattern, e))
            })?;

            builder.add(compiled_glob);
        }

        builder.build().map_err(|e| {
            SyncError::FilterPattern(format!("Failed to build globset: {}", e))
        })
    }
}

/// Validate a list of glob patterns without keeping the compiled set
pub fn validate_patterns(patterns: &[String]) -> Result<()> {
    ArchiveFilter::build_globset(patterns, false).map(|_| ())
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(|s| s.starts_with('.') && s != "." && s != "..")
            .unwrap_or(false)
    })
}
