use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crawl_sources::{FeedSourceConfig, HttpOptions};
use crawl_sync::filter::validate_patterns;
use crawl_sync::progress::DEFAULT_EVENT_BUFFER;
use crawl_sync::{AssetType, FetchOptions, FilterOptions, ManifestStore, ScanOptions, SyncLog, SyncOptions};

use crate::telemetry::TelemetryConfig;

const APP_DIR: &str = "crawlavator";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default = "default_sources")]
    pub sources: Vec<FeedSourceConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_root")]
    pub root: PathBuf,
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
    #[serde(default = "default_sync_log_file")]
    pub sync_log_file: String,
    #[serde(default = "default_private_feeds_file")]
    pub private_feeds_file: PathBuf,
    /// Stat every manifest entry during scans
    #[serde(default)]
    pub verify_manifest_paths: bool,
    /// Extra globs the scanner never treats as archived content
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_enabled_types")]
    pub enabled_types: Vec<AssetType>,
    #[serde(default = "default_item_delay", with = "humantime_serde")]
    pub item_delay: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items_per_source: Option<usize>,
    #[serde(default = "default_true")]
    pub checksum: bool,
    #[serde(default = "default_true")]
    pub write_sidecars: bool,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_download_timeout", with = "humantime_serde")]
    pub download_timeout: Duration,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            archive: ArchiveConfig::default(),
            download: DownloadConfig::default(),
            http: HttpConfig::default(),
            sources: default_sources(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_archive_root(),
            manifest_file: default_manifest_file(),
            sync_log_file: default_sync_log_file(),
            private_feeds_file: default_private_feeds_file(),
            verify_manifest_paths: false,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            enabled_types: default_enabled_types(),
            item_delay: default_item_delay(),
            max_items_per_source: None,
            checksum: true,
            write_sidecars: true,
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            download_timeout: default_download_timeout(),
            connect_timeout: default_connect_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            user_agent: None,
        }
    }
}

impl AppConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config: AppConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise the defaults
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if tokio::fs::try_exists(path.as_ref()).await? {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.archive.root.as_os_str().is_empty() {
            anyhow::bail!("Archive root cannot be empty");
        }
        for name in [&self.archive.manifest_file, &self.archive.sync_log_file] {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                anyhow::bail!("Archive file name must be a plain file name: '{}'", name);
            }
        }
        validate_patterns(&self.archive.exclude_patterns)?;

        if self.download.event_buffer == 0 {
            anyhow::bail!("download.event_buffer must be at least 1");
        }
        if self.http.retry_attempts == 0 {
            anyhow::bail!("http.retry_attempts must be at least 1");
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                anyhow::bail!("Source ID cannot be empty");
            }
            if source.id == crawl_sources::PRIVATE_SOURCE_ID {
                anyhow::bail!("Source ID '{}' is reserved for private feeds", source.id);
            }
            if !seen.insert(source.id.as_str()) {
                anyhow::bail!("Duplicate source ID: {}", source.id);
            }
            url::Url::parse(&source.url).with_context(|| format!("source '{}' has an invalid URL", source.id))?;
        }

        if !matches!(self.telemetry.log_rotation.frequency.as_str(), "daily" | "hourly" | "never") {
            anyhow::bail!(
                "telemetry.log_rotation.frequency must be daily, hourly or never, got '{}'",
                self.telemetry.log_rotation.frequency
            );
        }

        Ok(())
    }

    pub fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(self.archive.root.join(&self.archive.manifest_file))
    }

    pub fn sync_log(&self) -> SyncLog {
        SyncLog::new(self.archive.root.join(&self.archive.sync_log_file))
    }

    pub fn http_options(&self) -> HttpOptions {
        let mut options = HttpOptions {
            timeout: self.http.timeout,
            download_timeout: self.http.download_timeout,
            connect_timeout: self.http.connect_timeout,
            max_attempts: self.http.retry_attempts,
            retry_initial_interval: self.http.retry_delay,
            ..HttpOptions::default()
        };
        if let Some(agent) = &self.http.user_agent {
            options.user_agent = agent.clone();
        }
        options
    }

    /// Orchestrator options; a CLI `--limit` replaces the configured one
    pub fn sync_options(&self, limit: Option<usize>, retry_restricted: bool) -> SyncOptions {
        let mut filter_options = FilterOptions::default();
        filter_options
            .exclude_patterns
            .extend(self.archive.exclude_patterns.iter().cloned());

        SyncOptions {
            scan: ScanOptions {
                filter_options,
                verify_manifest_paths: self.archive.verify_manifest_paths,
                ..ScanOptions::default()
            },
            fetch: FetchOptions {
                item_delay: self.download.item_delay,
                checksum: self.download.checksum,
                write_sidecars: self.download.write_sidecars,
            },
            enabled_types: Some(self.download.enabled_types.clone()),
            max_items_per_source: limit.or(self.download.max_items_per_source),
            retry_restricted,
        }
    }
}

/// `<config dir>/crawlavator/config.toml`
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

fn default_archive_root() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_manifest_file() -> String { crawl_sync::manifest::MANIFEST_FILE.to_string() }
fn default_sync_log_file() -> String { crawl_sync::sync_log::SYNC_LOG_FILE.to_string() }
fn default_private_feeds_file() -> PathBuf { config_dir().join("rss_feeds.json") }

fn default_enabled_types() -> Vec<AssetType> { AssetType::ALL.to_vec() }
fn default_item_delay() -> Duration { Duration::from_secs(1) }
fn default_true() -> bool { true }
fn default_event_buffer() -> usize { DEFAULT_EVENT_BUFFER }

fn default_timeout() -> Duration { Duration::from_secs(30) }
fn default_download_timeout() -> Duration { Duration::from_secs(600) }
fn default_connect_timeout() -> Duration { Duration::from_secs(10) }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_delay() -> Duration { Duration::from_millis(500) }

fn default_sources() -> Vec<FeedSourceConfig> {
    vec![
        FeedSourceConfig::new("ezra_klein", "The Ezra Klein Show", "https://feeds.simplecast.com/82FI35Px"),
        FeedSourceConfig::new("fareed_zakaria", "Fareed Zakaria GPS", "http://rss.cnn.com/rss/cnn_gps.rss"),
        FeedSourceConfig::new("invest_like_best", "Invest Like the Best", "https://investlikethebest.libsyn.com/rss"),
        FeedSourceConfig::new("peter_zeihan", "Peter Zeihan Podcast", "https://media.rss.com/zeihan/feed.xml"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.archive.manifest_file, "manifest.json");
        assert_eq!(config.download.enabled_types.len(), 5);
        assert!(config.sources.iter().all(|s| s.enabled));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [archive]
            root = "/srv/archive"

            [download]
            item_delay = "250ms"
            enabled_types = ["audio"]

            [[sources]]
            id = "show"
            name = "Show"
            url = "https://example.com/feed.xml"
            "#,
        )
        .unwrap();

        assert_eq!(config.archive.root, PathBuf::from("/srv/archive"));
        assert_eq!(config.archive.sync_log_file, "sync_log.jsonl");
        assert_eq!(config.download.item_delay, Duration::from_millis(250));
        assert_eq!(config.download.enabled_types, vec![AssetType::Audio]);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].category, "podcast");
        assert_eq!(config.http.timeout, Duration::from_secs(30));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_sources() {
        let mut config = AppConfig::default();
        config.sources.push(config.sources[0].clone());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sources[0].url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sources[0].id = crawl_sources::PRIVATE_SOURCE_ID.to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.archive.exclude_patterns = vec!["[unclosed".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_limit_overrides_config() {
        let mut config = AppConfig::default();
        config.download.max_items_per_source = Some(10);

        assert_eq!(config.sync_options(None, false).max_items_per_source, Some(10));
        assert_eq!(config.sync_options(Some(2), true).max_items_per_source, Some(2));
        assert!(config.sync_options(None, true).retry_restricted);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = AppConfig::default();
        config.archive.root = dir.path().join("archive");
        config.download.max_items_per_source = Some(3);

        config.save(&path).await.unwrap();
        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);

        let missing = AppConfig::load_or_default(dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(missing.sources.len(), config.sources.len());
    }
}
