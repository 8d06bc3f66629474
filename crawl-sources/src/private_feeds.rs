//! User-supplied private feeds.
//!
//! The registry is a small JSON document the user edits through the CLI.
//! Every entry is validated by fetching and parsing it before it is
//! accepted. At sync time all entries are enumerated as one source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crawl_sync::{
    slugify, AssetType, ContentItem, ContentSource, Materialization, ProgressReporter, RunContext, SourceDescriptor,
    SyncError,
};

use crate::client::HttpClient;
use crate::error::{FeedError, Result};
use crate::feed::parse_feed;
use crate::rss::{download_item, EntryMapping};

/// Id the private feed source registers under
pub const PRIVATE_SOURCE_ID: &str = "private_rss";

const CATEGORY: &str = "podcast";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateFeed {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub added_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    feeds: Vec<PrivateFeed>,
}

/// Persisted list of private feeds
#[derive(Debug, Clone)]
pub struct PrivateFeedRegistry {
    path: PathBuf,
}

impl PrivateFeedRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registered feeds; a missing file is an empty registry
    pub async fn list(&self) -> Result<Vec<PrivateFeed>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => {
                let file: RegistryFile = serde_json::from_str(&content)?;
                Ok(file.feeds)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, feeds: Vec<PrivateFeed>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&RegistryFile { feeds })?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Validate `url` as a feed and append it under an id derived from `name`
    pub async fn add(&self, http: &HttpClient, name: &str, url: &str, author: Option<&str>) -> Result<PrivateFeed> {
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() {
            return Err(FeedError::Registry("feed name is empty".to_string()));
        }
        url::Url::parse(url)?;

        let mut feeds = self.list().await?;
        let id = slugify(name);
        if feeds.iter().any(|f| f.id == id) {
            return Err(FeedError::Registry(format!("a feed with id '{}' already exists", id)));
        }
        if feeds.iter().any(|f| f.url == url) {
            return Err(FeedError::Registry(format!("'{}' is already registered", url)));
        }

        let parsed = parse_feed(&http.get_text(url).await?)?;
        debug!(url, entries = parsed.entries.len(), "Private feed validated");

        let feed = PrivateFeed {
            id,
            name: name.to_string(),
            url: url.to_string(),
            author: author.map(str::trim).filter(|a| !a.is_empty()).map(str::to_string),
            added_date: Utc::now(),
        };
        feeds.push(feed.clone());
        self.save(feeds).await?;

        info!(feed_id = %feed.id, "Private feed added");
        Ok(feed)
    }

    pub async fn remove(&self, id: &str) -> Result<PrivateFeed> {
        let mut feeds = self.list().await?;
        let index = feeds
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| FeedError::Registry(format!("no feed with id '{}'", id)))?;
        let removed = feeds.remove(index);
        self.save(feeds).await?;

        info!(feed_id = %removed.id, "Private feed removed");
        Ok(removed)
    }
}

/// Every registered private feed, enumerated as one source
pub struct PrivateFeedsSource {
    registry: PrivateFeedRegistry,
    http: HttpClient,
}

impl PrivateFeedsSource {
    pub fn new(registry: PrivateFeedRegistry, http: HttpClient) -> Self {
        Self { registry, http }
    }

    async fn enumerate_feed(&self, feed: &PrivateFeed) -> Result<Vec<ContentItem>> {
        let parsed = parse_feed(&self.http.get_text(&feed.url).await?)?;
        let id_prefix = format!("rss_{}", feed.id);
        let mapping = EntryMapping {
            source_id: PRIVATE_SOURCE_ID,
            id_prefix: &id_prefix,
            category: CATEGORY,
            subcategory: Some(&feed.name),
            asset_type: AssetType::Audio,
        };
        Ok(mapping.map_feed(&parsed))
    }
}

#[async_trait]
impl ContentSource for PrivateFeedsSource {
    fn describe(&self) -> SourceDescriptor {
        SourceDescriptor {
            id: PRIVATE_SOURCE_ID.to_string(),
            name: "Private RSS Feeds".to_string(),
            requires_auth: false,
            asset_types: vec![AssetType::Audio],
            categories: vec![CATEGORY.to_string()],
        }
    }

    async fn enumerate(&self, ctx: &RunContext, progress: &ProgressReporter) -> crawl_sync::Result<Vec<ContentItem>> {
        let feeds = self
            .registry
            .list()
            .await
            .map_err(|e| SyncError::source_error(PRIVATE_SOURCE_ID, format!("feed registry unreadable: {}", e)))?;

        if feeds.is_empty() {
            progress.status("No private RSS feeds configured");
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        let mut failures = Vec::new();

        for feed in &feeds {
            if ctx.is_cancelled() {
                break;
            }
            progress.status(format!("Indexing {}", feed.name));

            match self.enumerate_feed(feed).await {
                Ok(feed_items) => {
                    debug!(feed_id = %feed.id, items = feed_items.len(), "Private feed indexed");
                    items.extend(feed_items);
                }
                Err(e) => {
                    warn!(feed_id = %feed.id, error = %e, "Private feed failed");
                    progress.warning(Some(PRIVATE_SOURCE_ID), format!("Error indexing {}: {}", feed.name, e));
                    failures.push(format!("{}: {}", feed.name, e));
                }
            }
        }

        if failures.len() == feeds.len() {
            return Err(SyncError::source_error(
                PRIVATE_SOURCE_ID,
                format!("every private feed failed ({})", failures.join("; ")),
            ));
        }

        Ok(items)
    }

    async fn materialize(
        &self,
        item: &ContentItem,
        output_dir: &Path,
        _ctx: &RunContext,
        progress: &ProgressReporter,
    ) -> Materialization {
        download_item(&self.http, item, output_dir, progress).await
    }
}
