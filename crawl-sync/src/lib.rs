//! Archive Sync Engine
//!
//! Incremental synchronization of content sources into a local archive:
//! - Local archive scanning backed by a persisted manifest
//! - Reconciliation of enumerated items against what is already archived
//! - Sequential, cancellable fetching with per-item fault isolation
//! - Run orchestration across sources with an append-only sync log
//! - Best-effort progress reporting

pub mod error;
pub mod item;
pub mod layout;
pub mod filter;
pub mod manifest;
pub mod scanner;
pub mod reconcile;
pub mod progress;
pub mod source;
pub mod fetch;
pub mod report;
pub mod sync_log;
pub mod orchestrator;

// Re-export main types
pub use error::{Result, SyncError};
pub use item::{AssetType, ContentItem, Materialization, SourceDescriptor};
pub use layout::{extension_from_url, safe_filename, slugify, ArchiveLayout, Sidecar};
pub use filter::{ArchiveFilter, FilterOptions};
pub use manifest::{EntryStatus, Manifest, ManifestEntry, ManifestSourceSummary, ManifestStore};
pub use scanner::{ArchiveIndex, ArchiveScanner, PresenceFact, PresenceKind, PresenceMap, ScanOptions, ScanReport};
pub use reconcile::{Disposition, ReconcileCounts, ReconcilePlan, Reconciler};
pub use progress::{ProgressChannel, ProgressEvent, ProgressReporter};
pub use source::{ContentSource, RunContext, SourceRegistry};
pub use fetch::{FetchDriver, FetchOptions, FetchReport};
pub use report::{RunTotals, SyncResult, SyncRun};
pub use sync_log::SyncLog;
pub use orchestrator::{SourcePreview, SyncOptions, SyncOrchestrator};

// Test modules
#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod reconcile_tests;
