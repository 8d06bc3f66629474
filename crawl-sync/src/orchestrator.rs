//! Sync orchestrator: scan, reconcile and fetch across every source.
//!
//! Sources run one at a time in the configured order. A source that fails to
//! enumerate is recorded and skipped; the run always completes and always
//! produces a [`SyncRun`].

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::fetch::{panic_message, FetchDriver, FetchOptions};
use crate::item::{AssetType, ContentItem};
use crate::manifest::{Manifest, ManifestStore};
use crate::progress::ProgressReporter;
use crate::reconcile::{ReconcileCounts, ReconcilePlan, Reconciler};
use crate::report::{SyncResult, SyncRun};
use crate::scanner::{ArchiveScanner, ScanOptions};
use crate::source::{ContentSource, RunContext};
use crate::sync_log::SyncLog;

/// Options for a sync run
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub scan: ScanOptions,
    pub fetch: FetchOptions,
    /// Asset types to download; `None` enables all
    pub enabled_types: Option<Vec<AssetType>>,
    /// Cap on new items fetched per source per run
    pub max_items_per_source: Option<usize>,
    /// Clear restricted manifest entries before reconciling
    pub retry_restricted: bool,
}

/// Dry-run view of one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcePreview {
    pub source_id: String,
    pub source_name: String,
    pub counts: ReconcileCounts,
    pub to_fetch: Vec<ContentItem>,
    pub invalid: usize,
    pub scan_warnings: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the whole pipeline for a set of sources
pub struct SyncOrchestrator {
    options: SyncOptions,
    scanner: ArchiveScanner,
    reconciler: Reconciler,
    manifest_store: ManifestStore,
    sync_log: SyncLog,
}

impl SyncOrchestrator {
    pub fn new(options: SyncOptions, manifest_store: ManifestStore, sync_log: SyncLog) -> Result<Self> {
        let scanner = ArchiveScanner::new(options.scan.clone())?;

        let mut reconciler = Reconciler::new().with_limit(options.max_items_per_source);
        if let Some(types) = &options.enabled_types {
            reconciler = reconciler.with_enabled_types(types.iter().copied());
        }

        Ok(Self {
            options,
            scanner,
            reconciler,
            manifest_store,
            sync_log,
        })
    }

    /// Orchestrator with the manifest and sync log at their default places in `root`
    pub fn for_archive(options: SyncOptions, root: &Path) -> Result<Self> {
        Self::new(options, ManifestStore::in_archive(root), SyncLog::in_archive(root))
    }

    pub fn manifest_store(&self) -> &ManifestStore {
        &self.manifest_store
    }

    pub fn sync_log(&self) -> &SyncLog {
        &self.sync_log
    }

    /// Sync every source in order and append the run to the sync log
    pub async fn run(
        &self,
        sources: &[Arc<dyn ContentSource>],
        ctx: &RunContext,
        progress: &ProgressReporter,
    ) -> SyncRun {
        let started = Instant::now();
        let timestamp = Utc::now();
        let total = sources.len();

        info!(run_id = %ctx.run_id, sources = total, root = %ctx.layout.root().display(), "Starting sync run");
        progress.status(format!("Starting sync of {} sources", total));

        let (mut manifest, store) = self.load_manifest(progress).await;
        let mut results = Vec::with_capacity(total);

        for (index, source) in sources.iter().enumerate() {
            if ctx.is_cancelled() {
                info!(run_id = %ctx.run_id, skipped = total - index, "Run cancelled before remaining sources");
                break;
            }

            let descriptor = source.describe();
            progress.status(format!("Source {} of {}: {}", index + 1, total, descriptor.name));

            let result = self.sync_source(source, ctx, &mut manifest, store, progress).await;
            progress.source_complete(&result);
            results.push(result);
        }

        manifest.last_sync = Some(Utc::now());
        if let Some(store) = store {
            if let Err(e) = store.save(&manifest).await {
                warn!(error = %e, "Failed to save manifest at end of run");
                progress.warning(None, format!("Failed to save manifest: {}", e));
            }
        }

        for source in sources {
            source.close().await;
        }

        let run = SyncRun::new(
            ctx.run_id,
            timestamp,
            started.elapsed().as_millis() as u64,
            ctx.is_cancelled(),
            results,
        );

        if let Err(e) = self.sync_log.append(&run).await {
            warn!(error = %e, "Failed to append sync log record");
            progress.warning(None, format!("Failed to append sync log: {}", e));
        }

        run.log_completion();
        progress.complete(&run);
        run
    }

    /// Enumerate, scan and reconcile without fetching or writing
    pub async fn preview(
        &self,
        sources: &[Arc<dyn ContentSource>],
        ctx: &RunContext,
        progress: &ProgressReporter,
    ) -> Vec<SourcePreview> {
        let (mut manifest, _) = self.load_manifest(progress).await;
        let mut previews = Vec::with_capacity(sources.len());

        for source in sources {
            if ctx.is_cancelled() {
                break;
            }

            let descriptor = source.describe();
            let mut preview = SourcePreview {
                source_id: descriptor.id.clone(),
                source_name: descriptor.name.clone(),
                ..Default::default()
            };

            if self.options.retry_restricted {
                manifest.clear_restricted(&descriptor.id);
            }

            match self.plan_source(source, ctx, &manifest, progress).await {
                Ok(planned) => {
                    preview.counts = planned.plan.counts;
                    preview.to_fetch = planned.plan.to_fetch;
                    preview.invalid = planned.invalid;
                    preview.scan_warnings = planned.scan_warnings;
                }
                Err(e) => preview.error = Some(e.to_string()),
            }
            previews.push(preview);
        }

        for source in sources {
            source.close().await;
        }

        previews
    }

    async fn sync_source(
        &self,
        source: &Arc<dyn ContentSource>,
        ctx: &RunContext,
        manifest: &mut Manifest,
        store: Option<&ManifestStore>,
        progress: &ProgressReporter,
    ) -> SyncResult {
        let descriptor = source.describe();
        let source_id = descriptor.id.clone();
        let mut result = SyncResult::new(&descriptor.id, &descriptor.name);

        if self.options.retry_restricted {
            let cleared = manifest.clear_restricted(&source_id);
            if cleared > 0 {
                info!(source_id = %source_id, cleared, "Cleared restricted entries for retry");
            }
        }

        let planned = match self.plan_source(source, ctx, manifest, progress).await {
            Ok(planned) => planned,
            Err(e) => {
                let message = e.to_string();
                warn!(source_id = %source_id, error = %message, "Source failed, skipping");
                progress.error(Some(&source_id), message.clone());
                result.error = Some(message);
                return result;
            }
        };

        let ReconcilePlan {
            to_fetch,
            counts,
            adoptions,
            ..
        } = planned.plan;

        result.indexed = counts.indexed;
        result.local = counts.local;
        result.restricted = counts.restricted;
        result.missing_locator = counts.missing_locator;
        result.type_excluded = counts.type_excluded;
        result.deferred = counts.deferred;
        result.duplicates = counts.duplicates;
        result.invalid = planned.invalid;
        result.scan_warnings = planned.scan_warnings;

        if !adoptions.is_empty() {
            let root = ctx.layout.root();
            let adopted = adoptions
                .into_iter()
                .filter(|a| {
                    let path = a.path.strip_prefix(root).unwrap_or(&a.path).to_path_buf();
                    manifest.adopt(&source_id, &a.item_id, path, a.asset_type)
                })
                .count();
            debug!(source_id = %source_id, adopted, "Adopted files found on disk into manifest");
        }

        progress.status(format!(
            "{}: {} items, {} already local, {} to download",
            descriptor.name,
            counts.indexed,
            counts.local,
            to_fetch.len()
        ));

        let fetched = FetchDriver::new(&self.options.fetch, store)
            .run(source, to_fetch, ctx, manifest, progress)
            .await;

        result.downloaded = fetched.downloaded;
        result.download_errors = fetched.download_errors;
        result.restricted += fetched.restricted;
        result.deferred += fetched.deferred;

        debug_assert!(result.is_balanced(), "unbalanced result: {:?}", result);

        info!(
            source_id = %source_id,
            indexed = result.indexed,
            local = result.local,
            downloaded = result.downloaded,
            download_errors = result.download_errors,
            restricted = result.restricted,
            deferred = result.deferred,
            "Source sync complete"
        );

        result
    }

    /// Enumerate, validate, scan and reconcile one source
    async fn plan_source(
        &self,
        source: &Arc<dyn ContentSource>,
        ctx: &RunContext,
        manifest: &Manifest,
        progress: &ProgressReporter,
    ) -> Result<PlannedSource> {
        let source_id = source.id();
        let enumerated = enumerate_isolated(source, ctx, progress).await?;

        let mut invalid = 0;
        let items: Vec<ContentItem> = enumerated
            .into_iter()
            .filter(|item| match item.validate(&source_id) {
                Ok(()) => true,
                Err(e) => {
                    invalid += 1;
                    warn!(source_id = %source_id, error = %e, "Skipping invalid item");
                    progress.warning(Some(&source_id), e.to_string());
                    false
                }
            })
            .collect();

        let scan = self.scanner.scan(&ctx.layout, &source_id, manifest).await;
        for message in &scan.warnings {
            progress.warning(Some(&source_id), message.clone());
        }

        let present = scan.index.resolve(&items);
        let plan = self.reconciler.reconcile(items, &present);

        Ok(PlannedSource {
            plan,
            invalid,
            scan_warnings: scan.warnings.len(),
        })
    }

    /// The manifest plus the store to save it to. An unreadable manifest file
    /// is left alone: the run continues on an empty in-memory manifest that
    /// is never written back.
    async fn load_manifest(&self, progress: &ProgressReporter) -> (Manifest, Option<&ManifestStore>) {
        match self.manifest_store.load().await {
            Ok(manifest) => (manifest, Some(&self.manifest_store)),
            Err(e) => {
                warn!(error = %e, "Cannot load manifest, continuing without saving it");
                progress.warning(None, format!("Cannot load manifest: {}", e));
                (Manifest::default(), None)
            }
        }
    }
}

struct PlannedSource {
    plan: ReconcilePlan,
    invalid: usize,
    scan_warnings: usize,
}

/// Run `enumerate` in its own task so a panic becomes a source failure
async fn enumerate_isolated(
    source: &Arc<dyn ContentSource>,
    ctx: &RunContext,
    progress: &ProgressReporter,
) -> Result<Vec<ContentItem>> {
    let source_id = source.id();
    let task_source = Arc::clone(source);
    let task_ctx = ctx.clone();
    let task_progress = progress.clone();

    let handle = tokio::spawn(async move { task_source.enumerate(&task_ctx, &task_progress).await });

    match handle.await {
        Ok(Ok(items)) => Ok(items),
        Ok(Err(e @ SyncError::Source { .. })) => Err(e),
        Ok(Err(e)) => Err(SyncError::source_error(source_id, e.to_string())),
        Err(e) if e.is_panic() => Err(SyncError::source_error(
            source_id,
            format!("enumerate panicked: {}", panic_message(e.into_panic())),
        )),
        Err(e) => Err(SyncError::source_error(source_id, format!("enumerate task aborted: {}", e))),
    }
}
