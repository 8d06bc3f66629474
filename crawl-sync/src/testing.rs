//! In-memory source used by the engine's tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::item::{AssetType, ContentItem, Materialization, SourceDescriptor};
use crate::layout::{extension_from_url, ArchiveLayout};
use crate::progress::ProgressReporter;
use crate::source::{ContentSource, RunContext};

/// How the fake answers `enumerate`
#[derive(Debug, Clone)]
pub enum EnumerateBehavior {
    Items,
    Fail(String),
    Panic,
}

/// How the fake answers `materialize` for one item
#[derive(Debug, Clone)]
pub enum ItemBehavior {
    Fail(String),
    Restrict(String),
    Panic,
}

pub struct FakeSource {
    id: String,
    items: Mutex<Vec<ContentItem>>,
    enumerate: Mutex<EnumerateBehavior>,
    behaviors: Mutex<HashMap<String, ItemBehavior>>,
    calls: Mutex<Vec<String>>,
    cancel_after: Mutex<Option<usize>>,
}

impl FakeSource {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            items: Mutex::new(Vec::new()),
            enumerate: Mutex::new(EnumerateBehavior::Items),
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            cancel_after: Mutex::new(None),
        }
    }

    /// Source offering audio items titled after `ids`
    pub fn with_items(id: &str, ids: &[&str]) -> Self {
        let source = Self::new(id);
        source.set_items(ids.iter().map(|item_id| source.item(item_id)).collect());
        source
    }

    /// A downloadable audio item belonging to this source
    pub fn item(&self, item_id: &str) -> ContentItem {
        ContentItem::new(&self.id, item_id, format!("Episode {}", item_id), "podcast", AssetType::Audio)
            .with_download_url(format!("https://example.com/{}/{}.mp3", self.id, item_id))
    }

    pub fn set_items(&self, items: Vec<ContentItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn set_enumerate(&self, behavior: EnumerateBehavior) {
        *self.enumerate.lock().unwrap() = behavior;
    }

    pub fn set_behavior(&self, item_id: &str, behavior: ItemBehavior) {
        self.behaviors.lock().unwrap().insert(item_id.to_string(), behavior);
    }

    pub fn clear_behavior(&self, item_id: &str) {
        self.behaviors.lock().unwrap().remove(item_id);
    }

    /// Cancel the run once this many materialize calls have started
    pub fn cancel_after(&self, calls: usize) {
        *self.cancel_after.lock().unwrap() = Some(calls);
    }

    /// Item ids passed to `materialize`, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    fn describe(&self) -> SourceDescriptor {
        SourceDescriptor {
            id: self.id.clone(),
            name: format!("Fake {}", self.id),
            requires_auth: false,
            asset_types: vec![AssetType::Audio],
            categories: vec!["podcast".to_string()],
        }
    }

    async fn enumerate(&self, _ctx: &RunContext, _progress: &ProgressReporter) -> Result<Vec<ContentItem>> {
        let behavior = self.enumerate.lock().unwrap().clone();
        match behavior {
            EnumerateBehavior::Items => Ok(self.items.lock().unwrap().clone()),
            EnumerateBehavior::Fail(message) => Err(SyncError::source_error(&self.id, message)),
            EnumerateBehavior::Panic => panic!("enumerate exploded"),
        }
    }

    async fn materialize(
        &self,
        item: &ContentItem,
        output_dir: &Path,
        ctx: &RunContext,
        _progress: &ProgressReporter,
    ) -> Materialization {
        let call_count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(item.id.clone());
            calls.len()
        };
        if *self.cancel_after.lock().unwrap() == Some(call_count) {
            ctx.cancel.cancel();
        }

        let behavior = self.behaviors.lock().unwrap().get(&item.id).cloned();
        match behavior {
            Some(ItemBehavior::Fail(reason)) => Materialization::failed(reason),
            Some(ItemBehavior::Restrict(reason)) => Materialization::restricted(reason),
            Some(ItemBehavior::Panic) => panic!("materialize exploded"),
            None => {
                let ext = item
                    .download_url
                    .as_deref()
                    .and_then(extension_from_url)
                    .unwrap_or(item.asset_type.default_extension());
                let stem = ArchiveLayout::available_stem(output_dir, item).await;
                let path = output_dir.join(format!("{}.{}", stem, ext));
                match tokio::fs::create_dir_all(output_dir).await {
                    Ok(()) => {}
                    Err(e) => return Materialization::failed(e.to_string()),
                }
                match tokio::fs::write(&path, item.id.as_bytes()).await {
                    Ok(()) => Materialization::saved(path, "saved"),
                    Err(e) => Materialization::failed(e.to_string()),
                }
            }
        }
    }
}
