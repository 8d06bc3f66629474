//! Local archive scanning: what do we already have for a source.
//!
//! The manifest is consulted first and trusted. A walk of the source's
//! directory then recovers identities for files the manifest does not know
//! about, from sidecar metadata or, failing that, from filename conventions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::filter::{ArchiveFilter, FilterOptions};
use crate::item::ContentItem;
use crate::layout::{ArchiveLayout, Sidecar};
use crate::manifest::{EntryStatus, Manifest};

/// Options for archive scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Follow symbolic links
    pub follow_links: bool,
    /// Maximum recursion depth below the source directory (None for unlimited)
    pub max_depth: Option<usize>,
    /// Which files count as archive content
    pub filter_options: FilterOptions,
    /// Stat complete manifest entries and drop those whose file is gone
    pub verify_manifest_paths: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            max_depth: None,
            filter_options: FilterOptions::default(),
            verify_manifest_paths: false,
        }
    }
}

/// What is known about an item that is already accounted for locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresenceKind {
    /// A saved asset exists (or the manifest says it does)
    Archived { path: PathBuf },
    /// A previous materialize attempt was denied access
    Restricted { reason: String },
}

/// Where a presence fact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceOrigin {
    Manifest,
    Sidecar,
    Filename,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceFact {
    pub kind: PresenceKind,
    pub origin: PresenceOrigin,
}

impl PresenceFact {
    pub fn is_archived(&self) -> bool {
        matches!(self.kind, PresenceKind::Archived { .. })
    }

    /// Found by the walk, not yet recorded in the manifest
    pub fn is_adoptable(&self) -> bool {
        self.is_archived() && self.origin != PresenceOrigin::Manifest
    }
}

/// item id -> presence fact, for one source
pub type PresenceMap = HashMap<String, PresenceFact>;

/// Identity index built by one scan of one source
#[derive(Debug, Default, Clone)]
pub struct ArchiveIndex {
    manifest: HashMap<String, PresenceFact>,
    /// sidecar item id -> stem key of the asset it describes
    sidecars: HashMap<String, String>,
    /// stem key -> asset path
    stems: HashMap<String, PathBuf>,
    /// stem key -> item id a sidecar or complete manifest entry assigns it to
    owners: HashMap<String, String>,
}

impl ArchiveIndex {
    pub fn manifest_entries(&self) -> usize {
        self.manifest.len()
    }

    pub fn files_indexed(&self) -> usize {
        self.stems.len()
    }

    /// Answer presence for an enumeration, manifest first then walk
    pub fn resolve(&self, items: &[ContentItem]) -> PresenceMap {
        let mut present = PresenceMap::new();

        for item in items {
            if let Some(fact) = self.lookup(item) {
                present.insert(item.id.clone(), fact);
            }
        }

        present
    }

    fn lookup(&self, item: &ContentItem) -> Option<PresenceFact> {
        if let Some(fact) = self.manifest.get(&item.id) {
            return Some(fact.clone());
        }

        if let Some(path) = self
            .sidecars
            .get(&item.id)
            .and_then(|stem_key| self.stems.get(stem_key))
        {
            return Some(PresenceFact {
                kind: PresenceKind::Archived { path: path.clone() },
                origin: PresenceOrigin::Sidecar,
            });
        }

        let key = ArchiveLayout::item_stem_key(item);
        if self.owners.get(&key).is_some_and(|owner| owner != &item.id) {
            return None;
        }
        self.stems
            .get(&key)
            .map(|path| PresenceFact {
                kind: PresenceKind::Archived { path: path.clone() },
                origin: PresenceOrigin::Filename,
            })
    }
}

/// Result of scanning one source
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub index: ArchiveIndex,
    /// Unreadable paths and unusable files, reported but never fatal
    pub warnings: Vec<String>,
    pub files_seen: usize,
}

/// Archive scanner using the manifest and walkdir
#[derive(Debug, Clone)]
pub struct ArchiveScanner {
    options: ScanOptions,
    filter: ArchiveFilter,
}

impl ArchiveScanner {
    /// Create a new scanner; fails only on invalid filter patterns
    pub fn new(options: ScanOptions) -> Result<Self> {
        let filter = ArchiveFilter::new(options.filter_options.clone())?;
        Ok(Self { options, filter })
    }

    /// Scan everything known about `source_id` under the archive root
    pub async fn scan(&self, layout: &ArchiveLayout, source_id: &str, manifest: &Manifest) -> ScanReport {
        let mut report = ScanReport::default();

        self.index_manifest(layout, source_id, manifest, &mut report).await;

        let source_dir = layout.source_dir(source_id);
        match fs::metadata(&source_dir).await {
            Ok(meta) if meta.is_dir() => self.walk(&source_dir, &mut report),
            Ok(_) => report
                .warnings
                .push(format!("'{}' is not a directory", source_dir.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(source_id, dir = %source_dir.display(), "Source directory does not exist yet");
            }
            Err(e) => report
                .warnings
                .push(format!("Cannot read '{}': {}", source_dir.display(), e)),
        }

        for message in &report.warnings {
            warn!(source_id, "{}", message);
        }

        debug!(
            source_id,
            manifest_entries = report.index.manifest_entries(),
            files_seen = report.files_seen,
            files_indexed = report.index.files_indexed(),
            warnings = report.warnings.len(),
            "Archive scan complete"
        );

        report
    }

    async fn index_manifest(
        &self,
        layout: &ArchiveLayout,
        source_id: &str,
        manifest: &Manifest,
        report: &mut ScanReport,
    ) {
        let source_dir = layout.source_dir(source_id);

        for (item_id, entry) in manifest.entries(source_id) {
            let kind = match entry.status {
                EntryStatus::Complete => {
                    let path = if entry.path.is_absolute() {
                        entry.path.clone()
                    } else {
                        layout.root().join(&entry.path)
                    };

                    if self.options.verify_manifest_paths
                        && !fs::try_exists(&path).await.unwrap_or(false)
                    {
                        report.warnings.push(format!(
                            "Manifest entry '{}' points at missing file '{}'",
                            item_id,
                            path.display()
                        ));
                        continue;
                    }

                    if let Some(key) = stem_key_within(&source_dir, &path) {
                        report.index.owners.entry(key).or_insert_with(|| item_id.clone());
                    }
                    PresenceKind::Archived { path }
                }
                EntryStatus::Restricted => PresenceKind::Restricted {
                    reason: entry.error.clone().unwrap_or_else(|| "access denied".to_string()),
                },
                EntryStatus::Failed => continue,
            };

            report.index.manifest.insert(
                item_id.clone(),
                PresenceFact {
                    kind,
                    origin: PresenceOrigin::Manifest,
                },
            );
        }
    }

    fn walk(&self, source_dir: &Path, report: &mut ScanReport) {
        let mut walker = WalkDir::new(source_dir).follow_links(self.options.follow_links);
        if let Some(max_depth) = self.options.max_depth {
            walker = walker.max_depth(max_depth);
        }

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| source_dir.display().to_string());
                    report.warnings.push(format!("Skipping unreadable '{}': {}", path, e));
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(source_dir) else {
                continue;
            };
            if !self.filter.should_include(relative) {
                continue;
            }
            report.files_seen += 1;

            let parent = relative.parent().unwrap_or_else(|| Path::new(""));

            if ArchiveFilter::is_sidecar(relative) {
                match read_sidecar(entry.path()) {
                    Ok(sidecar) => {
                        let stem = ArchiveLayout::file_stem_from_sidecar(relative);
                        let key = ArchiveLayout::stem_key(parent, &stem);
                        report.index.owners.insert(key.clone(), sidecar.id.clone());
                        report.index.sidecars.insert(sidecar.id, key);
                    }
                    Err(message) => report.warnings.push(message),
                }
                continue;
            }

            let Some(stem) = relative.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            report
                .index
                .stems
                .entry(ArchiveLayout::stem_key(parent, &stem))
                .or_insert_with(|| entry.path().to_path_buf());
        }
    }
}

/// Stem key of an archived file, if it lives under `source_dir`
fn stem_key_within(source_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(source_dir).ok()?;
    let stem = relative.file_stem()?.to_string_lossy();
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    Some(ArchiveLayout::stem_key(parent, &stem))
}

fn read_sidecar(path: &Path) -> std::result::Result<Sidecar, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Skipping unreadable sidecar '{}': {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("Skipping malformed sidecar '{}': {}", path.display(), e))
}
