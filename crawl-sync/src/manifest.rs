//! Persisted archive manifest: item id to saved path and status.
//!
//! The manifest is the authoritative record of what the archive holds. It is
//! rewritten atomically after every item outcome so an interrupted run
//! resumes from the last completed item.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::item::AssetType;

/// Manifest file name inside the archive root
pub const MANIFEST_FILE: &str = "manifest.json";

const MANIFEST_VERSION: u32 = 1;

/// Status of a manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// The asset was saved and counts as present
    Complete,
    /// The source denied access at materialize time
    Restricted,
    /// The last attempt failed; retried on the next run
    Failed,
}

/// One item's persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Saved path, relative to the archive root when possible
    #[serde(default)]
    pub path: PathBuf,
    pub asset_type: AssetType,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Hex sha256 of the saved file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl ManifestEntry {
    pub fn is_complete(&self) -> bool {
        self.status == EntryStatus::Complete
    }
}

/// In-memory manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// source id -> item id -> entry
    #[serde(default)]
    pub sources: BTreeMap<String, BTreeMap<String, ManifestEntry>>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            last_sync: None,
            sources: BTreeMap::new(),
        }
    }
}

/// Per-source entry counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSourceSummary {
    pub source_id: String,
    pub complete: usize,
    pub restricted: usize,
    pub failed: usize,
    pub total_bytes: u64,
}

impl Manifest {
    pub fn get(&self, source_id: &str, item_id: &str) -> Option<&ManifestEntry> {
        self.sources.get(source_id).and_then(|items| items.get(item_id))
    }

    /// Entries recorded for one source
    pub fn entries(&self, source_id: &str) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.sources.get(source_id).into_iter().flat_map(|items| items.iter())
    }

    /// Record a successful save, replacing any earlier entry
    pub fn record_complete(
        &mut self,
        source_id: &str,
        item_id: &str,
        path: PathBuf,
        asset_type: AssetType,
        size: Option<u64>,
        checksum: Option<String>,
    ) {
        let attempts = self.previous_attempts(source_id, item_id) + 1;
        self.insert(
            source_id,
            item_id,
            ManifestEntry {
                path,
                asset_type,
                status: EntryStatus::Complete,
                downloaded_at: Some(Utc::now()),
                size,
                checksum,
                error: None,
                attempts,
            },
        );
    }

    /// Record a failed attempt; the item stays eligible for the next run
    pub fn record_failed(
        &mut self,
        source_id: &str,
        item_id: &str,
        path: PathBuf,
        asset_type: AssetType,
        reason: impl Into<String>,
    ) {
        let attempts = self.previous_attempts(source_id, item_id) + 1;
        self.insert(
            source_id,
            item_id,
            ManifestEntry {
                path,
                asset_type,
                status: EntryStatus::Failed,
                downloaded_at: None,
                size: None,
                checksum: None,
                error: Some(reason.into()),
                attempts,
            },
        );
    }

    /// Record an access denial; the item is skipped until cleared
    pub fn record_restricted(
        &mut self,
        source_id: &str,
        item_id: &str,
        path: PathBuf,
        asset_type: AssetType,
        reason: impl Into<String>,
    ) {
        let attempts = self.previous_attempts(source_id, item_id) + 1;
        self.insert(
            source_id,
            item_id,
            ManifestEntry {
                path,
                asset_type,
                status: EntryStatus::Restricted,
                downloaded_at: None,
                size: None,
                checksum: None,
                error: Some(reason.into()),
                attempts,
            },
        );
    }

    /// Adopt a file the directory walk found; existing complete entries win
    pub fn adopt(&mut self, source_id: &str, item_id: &str, path: PathBuf, asset_type: AssetType) -> bool {
        if self.get(source_id, item_id).is_some_and(ManifestEntry::is_complete) {
            return false;
        }
        self.insert(
            source_id,
            item_id,
            ManifestEntry {
                path,
                asset_type,
                status: EntryStatus::Complete,
                downloaded_at: None,
                size: None,
                checksum: None,
                error: None,
                attempts: 0,
            },
        );
        true
    }

    /// Drop one entry so the item is re-evaluated from scratch
    pub fn forget(&mut self, source_id: &str, item_id: &str) -> Option<ManifestEntry> {
        let items = self.sources.get_mut(source_id)?;
        let removed = items.remove(item_id);
        if items.is_empty() {
            self.sources.remove(source_id);
        }
        removed
    }

    /// Remove every restricted entry for a source; returns how many were cleared
    pub fn clear_restricted(&mut self, source_id: &str) -> usize {
        let Some(items) = self.sources.get_mut(source_id) else {
            return 0;
        };
        let before = items.len();
        items.retain(|_, entry| entry.status != EntryStatus::Restricted);
        before - items.len()
    }

    pub fn summary(&self) -> Vec<ManifestSourceSummary> {
        self.sources
            .iter()
            .map(|(source_id, items)| {
                let mut summary = ManifestSourceSummary {
                    source_id: source_id.clone(),
                    ..Default::default()
                };
                for entry in items.values() {
                    match entry.status {
                        EntryStatus::Complete => {
                            summary.complete += 1;
                            summary.total_bytes += entry.size.unwrap_or(0);
                        }
                        EntryStatus::Restricted => summary.restricted += 1,
                        EntryStatus::Failed => summary.failed += 1,
                    }
                }
                summary
            })
            .collect()
    }

    fn previous_attempts(&self, source_id: &str, item_id: &str) -> u32 {
        self.get(source_id, item_id).map(|e| e.attempts).unwrap_or(0)
    }

    fn insert(&mut self, source_id: &str, item_id: &str, entry: ManifestEntry) {
        self.sources
            .entry(source_id.to_string())
            .or_default()
            .insert(item_id.to_string(), entry);
    }
}

/// Loads and atomically saves the manifest file
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<root>/manifest.json`
    pub fn in_archive(root: &Path) -> Self {
        Self::new(root.join(MANIFEST_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest, starting fresh when it is missing.
    ///
    /// A file that does not parse (including one that is not UTF-8) is moved
    /// aside and replaced by an empty manifest; the directory walk
    /// rediscovers what it described.
    pub async fn load(&self) -> Result<Manifest> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No manifest yet, starting empty");
                return Ok(Manifest::default());
            }
            Err(e) => {
                return Err(SyncError::manifest_error(
                    &self.path,
                    format!("Failed to read manifest: {}", e),
                ))
            }
        };

        match serde_json::from_slice::<Manifest>(&content) {
            Ok(manifest) => Ok(manifest),
            Err(parse_err) => {
                let aside = self.corrupt_path();
                warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    error = %parse_err,
                    "Manifest is corrupt, moving it aside and starting fresh"
                );
                fs::rename(&self.path, &aside).await.map_err(|e| {
                    SyncError::manifest_error(
                        &self.path,
                        format!("Failed to move corrupt manifest aside: {}", e),
                    )
                })?;
                Ok(Manifest::default())
            }
        }
    }

    /// Write the manifest via a temp file and rename
    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                SyncError::manifest_error(&self.path, format!("Failed to create directory: {}", e))
            })?;
        }

        let json = serde_json::to_vec_pretty(manifest)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, &json).await.map_err(|e| {
            SyncError::manifest_error(&tmp, format!("Failed to write manifest: {}", e))
        })?;
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            SyncError::manifest_error(&self.path, format!("Failed to replace manifest: {}", e))
        })?;

        Ok(())
    }

    fn corrupt_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| MANIFEST_FILE.to_string());
        self.path.with_file_name(format!("{}.corrupt-{}", name, stamp))
    }
}
