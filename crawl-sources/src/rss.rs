//! Public podcast feed source

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crawl_sync::{
    slugify, ArchiveLayout, AssetType, ContentItem, ContentSource, Materialization, ProgressReporter, RunContext,
    SourceDescriptor, SyncError,
};

use crate::client::HttpClient;
use crate::feed::{parse_feed, FeedEntry, ParsedFeed};

const UNTITLED: &str = "Untitled Episode";

/// One configured public feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_asset_type")]
    pub asset_type: AssetType,
}

fn default_category() -> String {
    "podcast".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_asset_type() -> AssetType {
    AssetType::Audio
}

impl FeedSourceConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            category: default_category(),
            enabled: true,
            asset_type: AssetType::Audio,
        }
    }
}

/// How feed entries turn into items for one source
pub(crate) struct EntryMapping<'a> {
    pub source_id: &'a str,
    pub id_prefix: &'a str,
    pub category: &'a str,
    pub subcategory: Option<&'a str>,
    pub asset_type: AssetType,
}

impl EntryMapping<'_> {
    /// `None` when the entry has no identity; the parser already drops those
    pub fn to_item(&self, entry: &FeedEntry) -> Option<ContentItem> {
        let identity = entry.identity()?;
        let title = entry.title.as_deref().unwrap_or(UNTITLED);

        let mut item = ContentItem::new(
            self.source_id,
            format!("{}_{}", self.id_prefix, slugify(identity)),
            title,
            self.category,
            self.asset_type,
        );
        if let Some(link) = entry.link.as_deref() {
            item = item.with_url(link);
        }
        if let Some(sub) = self.subcategory {
            item = item.with_subcategory(sub);
        }
        if let Some(date) = entry.date {
            item = item.with_date(date);
        }
        if let Some(description) = entry.description.as_deref() {
            item = item.with_description(description);
        }
        if let Some(locator) = entry.locator_for(self.asset_type) {
            item = item.with_download_url(locator);
        }
        Some(item)
    }

    pub fn map_feed(&self, feed: &ParsedFeed) -> Vec<ContentItem> {
        feed.entries.iter().filter_map(|entry| self.to_item(entry)).collect()
    }
}

/// Download an item's locator into `output_dir` as `<stem>.<ext>`
pub(crate) async fn download_item(
    http: &HttpClient,
    item: &ContentItem,
    output_dir: &Path,
    progress: &ProgressReporter,
) -> Materialization {
    let Some(url) = item.download_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        return Materialization::failed("No download URL available");
    };

    progress.status(format!("Downloading {}", item.title));
    let stem = ArchiveLayout::available_stem(output_dir, item).await;

    match http
        .download_to(url, output_dir, &stem, item.asset_type.default_extension())
        .await
    {
        Ok(file) => {
            let ext = file
                .path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            Materialization::saved(file.path, format!("Downloaded {} file (.{}, {} bytes)", item.asset_type, ext, file.bytes))
        }
        Err(e) if e.is_access_denied() => {
            debug!(item_id = %item.id, error = %e, "Asset access denied");
            Materialization::restricted(e.to_string())
        }
        Err(e) => Materialization::failed(format!("Download error: {}", e)),
    }
}

/// A single public RSS or Atom feed
pub struct RssFeedSource {
    config: FeedSourceConfig,
    http: HttpClient,
}

impl RssFeedSource {
    pub fn new(config: FeedSourceConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &FeedSourceConfig {
        &self.config
    }

    fn mapping(&self) -> EntryMapping<'_> {
        EntryMapping {
            source_id: &self.config.id,
            id_prefix: &self.config.id,
            category: &self.config.category,
            subcategory: None,
            asset_type: self.config.asset_type,
        }
    }
}

#[async_trait]
impl ContentSource for RssFeedSource {
    fn describe(&self) -> SourceDescriptor {
        SourceDescriptor {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            requires_auth: false,
            asset_types: vec![self.config.asset_type],
            categories: vec![self.config.category.clone()],
        }
    }

    async fn enumerate(&self, _ctx: &RunContext, progress: &ProgressReporter) -> crawl_sync::Result<Vec<ContentItem>> {
        let source_id = self.config.id.as_str();
        progress.status(format!("Fetching feed for {}", self.config.name));

        let body = self
            .http
            .get_text(&self.config.url)
            .await
            .map_err(|e| SyncError::source_error(source_id, e.to_string()))?;
        let feed = parse_feed(&body).map_err(|e| SyncError::source_error(source_id, e.to_string()))?;

        if feed.skipped > 0 {
            progress.warning(
                Some(source_id),
                format!("Skipped {} feed entries without guid or title", feed.skipped),
            );
        }
        if feed.truncated {
            warn!(source_id, "Feed document was truncated; using entries read so far");
        }

        let items = self.mapping().map_feed(&feed);
        info!(source_id, items = items.len(), "Feed indexed");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{offline_options, podcast_xml, TestServer};
    use tempfile::TempDir;

    fn source(server: &TestServer) -> RssFeedSource {
        let config = FeedSourceConfig::new("deep_dives", "Deep Dives", server.url("/feed.xml"));
        RssFeedSource::new(config, HttpClient::new(offline_options()).unwrap())
    }

    fn ctx(dir: &TempDir) -> RunContext {
        RunContext::new(ArchiveLayout::new(dir.path()))
    }

    #[tokio::test]
    async fn test_enumerate_builds_stable_items() {
        let body = podcast_xml("https://cdn.example.com", &["EP-1", "EP-2"]);
        let server = TestServer::start(vec![("/feed.xml", 200, "application/rss+xml", body)]).await;
        let dir = TempDir::new().unwrap();
        let src = source(&server);

        let items = src.enumerate(&ctx(&dir), &ProgressReporter::disabled()).await.unwrap();
        let again = src.enumerate(&ctx(&dir), &ProgressReporter::disabled()).await.unwrap();

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["deep_dives_ep_1", "deep_dives_ep_2"]);
        assert_eq!(items, again);
        assert_eq!(items[0].category, "podcast");
        assert!(items[0].download_url.as_deref().unwrap().ends_with("/audio/EP-1.mp3"));
        for item in &items {
            item.validate("deep_dives").unwrap();
        }
    }

    #[tokio::test]
    async fn test_html_page_is_a_source_failure() {
        let server = TestServer::start(vec![("/feed.xml", 200, "text/html", "<html><body>Sign in</body></html>".into())]).await;
        let dir = TempDir::new().unwrap();

        let err = source(&server)
            .enumerate(&ctx(&dir), &ProgressReporter::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Source { ref source_id, .. } if source_id == "deep_dives"));
    }

    #[tokio::test]
    async fn test_materialize_outcomes() {
        let server = TestServer::start(vec![
            ("/audio/ok.mp3", 200, "audio/mpeg", "ID3data".into()),
            ("/audio/paid.mp3", 403, "text/plain", "subscribers only".into()),
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let src = source(&server);
        let out = dir.path().join("deep_dives/podcast");

        let ok = ContentItem::new("deep_dives", "deep_dives_ok", "Free Episode", "podcast", AssetType::Audio)
            .with_download_url(server.url("/audio/ok.mp3"));
        let paid = ContentItem::new("deep_dives", "deep_dives_paid", "Paid Episode", "podcast", AssetType::Audio)
            .with_download_url(server.url("/audio/paid.mp3"));
        let missing = ContentItem::new("deep_dives", "deep_dives_gone", "Gone", "podcast", AssetType::Audio)
            .with_download_url(server.url("/audio/gone.mp3"));

        let saved = src.materialize(&ok, &out, &ctx(&dir), &ProgressReporter::disabled()).await;
        assert_eq!(saved, Materialization::Saved {
            path: out.join("Free_Episode.mp3"),
            message: "Downloaded audio file (.mp3, 7 bytes)".to_string(),
        });

        let denied = src.materialize(&paid, &out, &ctx(&dir), &ProgressReporter::disabled()).await;
        assert!(matches!(denied, Materialization::Restricted { .. }));

        let failed = src.materialize(&missing, &out, &ctx(&dir), &ProgressReporter::disabled()).await;
        assert!(matches!(failed, Materialization::Failed { .. }));
        assert!(!out.join("Gone.mp3").exists());
    }

    #[tokio::test]
    async fn test_same_title_downloads_do_not_overwrite() {
        let server = TestServer::start(vec![
            ("/audio/a.mp3", 200, "audio/mpeg", "first".into()),
            ("/audio/b.mp3", 200, "audio/mpeg", "second".into()),
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let src = source(&server);
        let out = dir.path().join("deep_dives/podcast");

        let a = ContentItem::new("deep_dives", "deep_dives_a", "Bonus", "podcast", AssetType::Audio)
            .with_download_url(server.url("/audio/a.mp3"));
        let b = ContentItem::new("deep_dives", "deep_dives_b", "Bonus", "podcast", AssetType::Audio)
            .with_download_url(server.url("/audio/b.mp3"));

        src.materialize(&a, &out, &ctx(&dir), &ProgressReporter::disabled()).await;
        let second = src.materialize(&b, &out, &ctx(&dir), &ProgressReporter::disabled()).await;

        let expected = out.join(format!("Bonus_{}.mp3", crawl_sync::layout::short_hash("deep_dives_b")));
        assert!(matches!(second, Materialization::Saved { ref path, .. } if path == &expected));
        assert_eq!(std::fs::read_to_string(out.join("Bonus.mp3")).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "second");
    }

    #[test]
    fn test_long_guids_map_to_distinct_ids() {
        let feed = parse_feed(
            "<rss><channel>\
             <item><title>One</title><guid>https://www.example.com/podcasts/show-name/episode-123</guid></item>\
             <item><title>Two</title><guid>https://www.example.com/podcasts/show-name/episode-124</guid></item>\
             </channel></rss>",
        )
        .unwrap();
        let mapping = EntryMapping {
            source_id: "s",
            id_prefix: "s",
            category: "podcast",
            subcategory: None,
            asset_type: AssetType::Audio,
        };

        let items = mapping.map_feed(&feed);
        assert_eq!(items.len(), 2);
        assert_ne!(items[0].id, items[1].id);
    }

    #[test]
    fn test_entry_without_audio_has_no_locator() {
        let feed = parse_feed(
            "<rss><channel><item><title>Notes only</title><guid>n1</guid></item></channel></rss>",
        )
        .unwrap();
        let mapping = EntryMapping {
            source_id: "s",
            id_prefix: "s",
            category: "podcast",
            subcategory: Some("Show"),
            asset_type: AssetType::Audio,
        };

        let items = mapping.map_feed(&feed);
        assert_eq!(items.len(), 1);
        assert!(!items[0].has_locator());
        assert_eq!(items[0].subcategory.as_deref(), Some("Show"));
    }
}
