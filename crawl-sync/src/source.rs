//! Content source capability contract and the source registry.
//!
//! Every source (public feed, private feed list, authenticated site)
//! implements [`ContentSource`]. The registry is built explicitly at start
//! up from a list of registration calls; there is no global registration.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::item::{ContentItem, Materialization, SourceDescriptor};
use crate::layout::ArchiveLayout;
use crate::progress::ProgressReporter;

/// Per-run state passed to every call that needs it
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub layout: ArchiveLayout,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(layout: ArchiveLayout) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            layout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A content provider the sync engine can enumerate and fetch from.
///
/// `enumerate` skips items it cannot parse and fails only when the whole
/// source is unusable. It must return the same ids for unchanged upstream
/// content. `materialize` reports expected failures (timeouts, 404s, access
/// denied) as a [`Materialization`] value and never as an error.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Static description; pure and cheap
    fn describe(&self) -> SourceDescriptor;

    /// List every item the source currently offers
    async fn enumerate(&self, ctx: &RunContext, progress: &ProgressReporter) -> Result<Vec<ContentItem>>;

    /// Save one item's asset into `output_dir`
    async fn materialize(
        &self,
        item: &ContentItem,
        output_dir: &Path,
        ctx: &RunContext,
        progress: &ProgressReporter,
    ) -> Materialization;

    /// Release sessions or connections once the run is over
    async fn close(&self) {}

    fn id(&self) -> String {
        self.describe().id
    }
}

/// Ordered set of sources, keyed by id
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn ContentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source; ids must be unique
    pub fn register(&mut self, source: Arc<dyn ContentSource>) -> Result<()> {
        let id = source.id();
        if self.get(&id).is_some() {
            return Err(SyncError::DuplicateSource(id));
        }
        self.sources.push(source);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ContentSource>> {
        self.sources.iter().find(|s| s.id() == id).cloned()
    }

    /// Sources in registration order
    pub fn sources(&self) -> &[Arc<dyn ContentSource>] {
        &self.sources
    }

    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        self.sources.iter().map(|s| s.describe()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources for `ids` in registration order; empty `ids` selects all
    pub fn select(&self, ids: &[String]) -> Result<Vec<Arc<dyn ContentSource>>> {
        if let Some(unknown) = ids.iter().find(|id| self.get(id).is_none()) {
            return Err(SyncError::UnknownSource(unknown.clone()));
        }

        Ok(self
            .sources
            .iter()
            .filter(|s| ids.is_empty() || ids.contains(&s.id()))
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|s| s.id()))
            .finish()
    }
}
