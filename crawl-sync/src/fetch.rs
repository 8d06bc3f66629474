//! Fetch driver: sequential materialization of a reconciled batch.
//!
//! One item at a time, in enumeration order. A failing item is recorded and
//! the batch moves on. Cancellation is checked before each item; an
//! in-flight materialize call always runs to completion.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::item::{ContentItem, Materialization};
use crate::layout::{ArchiveLayout, Sidecar};
use crate::manifest::{Manifest, ManifestStore};
use crate::progress::ProgressReporter;
use crate::source::{ContentSource, RunContext};

/// Options for the fetch driver
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Pause between items
    pub item_delay: Duration,
    /// Record a sha256 of every saved file in the manifest
    pub checksum: bool,
    /// Write `<stem>_metadata.json` next to every saved asset
    pub write_sidecars: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            item_delay: Duration::from_secs(1),
            checksum: true,
            write_sidecars: true,
        }
    }
}

/// A single item that could not be saved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub title: String,
    pub reason: String,
}

/// Outcome of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub downloaded: usize,
    pub download_errors: usize,
    /// Denied by the source during this run
    pub restricted: usize,
    /// Not attempted because the run was cancelled
    pub deferred: usize,
    pub cancelled: bool,
    pub failures: Vec<ItemFailure>,
}

/// Drives `materialize` over a batch and keeps the manifest current
pub struct FetchDriver<'a> {
    options: &'a FetchOptions,
    /// `None` keeps the manifest in memory only
    store: Option<&'a ManifestStore>,
}

impl<'a> FetchDriver<'a> {
    pub fn new(options: &'a FetchOptions, store: Option<&'a ManifestStore>) -> Self {
        Self { options, store }
    }

    pub async fn run(
        &self,
        source: &Arc<dyn ContentSource>,
        to_fetch: Vec<ContentItem>,
        ctx: &RunContext,
        manifest: &mut Manifest,
        progress: &ProgressReporter,
    ) -> FetchReport {
        let mut report = FetchReport::default();
        let total = to_fetch.len();
        let source_id = source.id();

        for (index, item) in to_fetch.into_iter().enumerate() {
            if ctx.is_cancelled() {
                report.cancelled = true;
                report.deferred = total - index;
                info!(source_id = %source_id, remaining = report.deferred, "Run cancelled, stopping fetch");
                progress.warning(Some(&source_id), format!("Cancelled with {} items remaining", report.deferred));
                break;
            }

            if index > 0 && !self.options.item_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.options.item_delay) => {}
                    _ = ctx.cancel.cancelled() => {}
                }
                if ctx.is_cancelled() {
                    report.cancelled = true;
                    report.deferred = total - index;
                    progress.warning(Some(&source_id), format!("Cancelled with {} items remaining", report.deferred));
                    break;
                }
            }

            let position = index + 1;
            let item_dir = ctx.layout.item_dir(&item);
            debug!(source_id = %source_id, item_id = %item.id, dir = %item_dir.display(), "Materializing item");

            let outcome = materialize_isolated(source, &item, &item_dir, ctx, progress).await;
            let message = self.record(&item, &item_dir, outcome, ctx, manifest, &mut report).await;

            if let Some(store) = self.store {
                if let Err(e) = store.save(manifest).await {
                    warn!(source_id = %source_id, error = %e, "Failed to save manifest");
                    progress.warning(Some(&source_id), format!("Failed to save manifest: {}", e));
                }
            }

            progress.progress(
                &source_id,
                position,
                total,
                format!("[{}/{}] {}: {}", position, total, item.title, message),
            );
        }

        report
    }

    /// Fold one outcome into the manifest and the report; returns the progress message
    async fn record(
        &self,
        item: &ContentItem,
        item_dir: &Path,
        outcome: Materialization,
        ctx: &RunContext,
        manifest: &mut Manifest,
        report: &mut FetchReport,
    ) -> String {
        let root = ctx.layout.root();
        let expected = relative_to(root, &item_dir.join(ArchiveLayout::file_stem(item)));

        match outcome {
            Materialization::Saved { path, message } => {
                let (size, checksum) = self.file_facts(&path).await;
                manifest.record_complete(
                    &item.source_id,
                    &item.id,
                    relative_to(root, &path),
                    item.asset_type,
                    size,
                    checksum,
                );
                if self.options.write_sidecars {
                    write_sidecar(&path, item).await;
                }
                report.downloaded += 1;
                info!(source_id = %item.source_id, item_id = %item.id, path = %path.display(), "Item saved");
                message
            }
            Materialization::Failed { reason } => {
                manifest.record_failed(&item.source_id, &item.id, expected, item.asset_type, reason.clone());
                report.download_errors += 1;
                report.failures.push(ItemFailure {
                    item_id: item.id.clone(),
                    title: item.title.clone(),
                    reason: reason.clone(),
                });
                warn!(source_id = %item.source_id, item_id = %item.id, reason = %reason, "Item download failed");
                format!("failed: {}", reason)
            }
            Materialization::Restricted { reason } => {
                manifest.record_restricted(&item.source_id, &item.id, expected, item.asset_type, reason.clone());
                report.restricted += 1;
                info!(source_id = %item.source_id, item_id = %item.id, reason = %reason, "Item restricted");
                format!("restricted: {}", reason)
            }
        }
    }

    async fn file_facts(&self, path: &Path) -> (Option<u64>, Option<String>) {
        let size = tokio::fs::metadata(path).await.ok().map(|m| m.len());
        let checksum = if self.options.checksum {
            match sha256_file(path).await {
                Ok(sum) => Some(sum),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to checksum saved file");
                    None
                }
            }
        } else {
            None
        };
        (size, checksum)
    }
}

/// Run `materialize` in its own task so a panic becomes a failed item
async fn materialize_isolated(
    source: &Arc<dyn ContentSource>,
    item: &ContentItem,
    item_dir: &Path,
    ctx: &RunContext,
    progress: &ProgressReporter,
) -> Materialization {
    let task_source = Arc::clone(source);
    let task_item = item.clone();
    let task_dir = item_dir.to_path_buf();
    let task_ctx = ctx.clone();
    let task_progress = progress.clone();

    let handle = tokio::spawn(async move {
        task_source
            .materialize(&task_item, &task_dir, &task_ctx, &task_progress)
            .await
    });

    match handle.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(source_id = %item.source_id, item_id = %item.id, panic = %message, "materialize panicked");
            Materialization::failed(format!("materialize panicked: {}", message))
        }
        Err(e) => Materialization::failed(format!("materialize task aborted: {}", e)),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn write_sidecar(asset: &Path, item: &ContentItem) {
    let path = ArchiveLayout::sidecar_for(asset);
    let result = match serde_json::to_vec_pretty(&Sidecar::from(item)) {
        Ok(json) => tokio::fs::write(&path, json).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to write sidecar metadata");
    }
}

/// Hex sha256 of a file's contents
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
