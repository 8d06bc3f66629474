//! Reconciliation of an enumeration against local presence.
//!
//! Pure: no network, no disk. Given what a source offers and what the archive
//! already holds, decide what to fetch and account for everything else.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::item::{AssetType, ContentItem};
use crate::scanner::{PresenceKind, PresenceMap};

/// Where one unique enumerated item ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Already present in the archive
    Local,
    /// Asset type not enabled
    TypeExcluded,
    /// Flagged by the source, or denied on an earlier run
    Restricted,
    /// No usable download locator
    MissingLocator,
    /// New, selected for this run
    Fetch,
    /// New, but over the per-source limit
    Deferred,
}

/// Bucket counts produced by reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounts {
    /// Unique items after de-duplication
    pub indexed: usize,
    pub local: usize,
    pub type_excluded: usize,
    pub restricted: usize,
    pub missing_locator: usize,
    pub to_fetch: usize,
    pub deferred: usize,
    /// Repeated ids dropped in favour of their first occurrence
    pub duplicates: usize,
}

impl ReconcileCounts {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Local => self.local += 1,
            Disposition::TypeExcluded => self.type_excluded += 1,
            Disposition::Restricted => self.restricted += 1,
            Disposition::MissingLocator => self.missing_locator += 1,
            Disposition::Fetch => self.to_fetch += 1,
            Disposition::Deferred => self.deferred += 1,
        }
    }
}

/// A walk-discovered file that should be recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adoption {
    pub item_id: String,
    pub path: PathBuf,
    pub asset_type: AssetType,
}

/// Output of [`Reconciler::reconcile`]
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    /// New items to materialize, in enumeration order
    pub to_fetch: Vec<ContentItem>,
    pub counts: ReconcileCounts,
    /// Disposition of every unique item, in enumeration order
    pub dispositions: Vec<(String, Disposition)>,
    pub adoptions: Vec<Adoption>,
}

/// Reconciliation policy for one source
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    /// Enabled asset types; `None` enables everything
    enabled_types: Option<HashSet<AssetType>>,
    /// Maximum items to fetch in one run
    limit: Option<usize>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled_types(mut self, types: impl IntoIterator<Item = AssetType>) -> Self {
        self.enabled_types = Some(types.into_iter().collect());
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn type_enabled(&self, asset_type: AssetType) -> bool {
        self.enabled_types
            .as_ref()
            .map(|types| types.contains(&asset_type))
            .unwrap_or(true)
    }

    /// Classify every enumerated item into exactly one bucket
    pub fn reconcile(&self, enumerated: Vec<ContentItem>, present: &PresenceMap) -> ReconcilePlan {
        let mut plan = ReconcilePlan::default();
        let mut seen = HashSet::with_capacity(enumerated.len());

        for item in enumerated {
            if !seen.insert(item.id.clone()) {
                plan.counts.duplicates += 1;
                continue;
            }
            plan.counts.indexed += 1;

            let fact = present.get(&item.id);
            let disposition = match fact.map(|f| &f.kind) {
                Some(PresenceKind::Archived { path }) => {
                    if fact.is_some_and(|f| f.is_adoptable()) {
                        plan.adoptions.push(Adoption {
                            item_id: item.id.clone(),
                            path: path.clone(),
                            asset_type: item.asset_type,
                        });
                    }
                    Disposition::Local
                }
                _ if !self.type_enabled(item.asset_type) => Disposition::TypeExcluded,
                Some(PresenceKind::Restricted { .. }) => Disposition::Restricted,
                None if item.restricted => Disposition::Restricted,
                None if !item.has_locator() => Disposition::MissingLocator,
                None => match self.limit {
                    Some(limit) if plan.to_fetch.len() >= limit => Disposition::Deferred,
                    _ => Disposition::Fetch,
                },
            };

            plan.counts.record(disposition);
            plan.dispositions.push((item.id.clone(), disposition));
            if disposition == Disposition::Fetch {
                plan.to_fetch.push(item);
            }
        }

        plan
    }
}
