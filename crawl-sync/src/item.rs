//! Content items, source descriptors and materialization outcomes

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Kind of asset an item materializes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Video,
    Audio,
    Article,
    Pdf,
    Transcript,
}

impl AssetType {
    /// Every asset type, in display order
    pub const ALL: [AssetType; 5] = [
        AssetType::Video,
        AssetType::Audio,
        AssetType::Article,
        AssetType::Pdf,
        AssetType::Transcript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Video => "video",
            AssetType::Audio => "audio",
            AssetType::Article => "article",
            AssetType::Pdf => "pdf",
            AssetType::Transcript => "transcript",
        }
    }

    /// File extension used when the locator gives no better hint
    pub fn default_extension(&self) -> &'static str {
        match self {
            AssetType::Video => "mp4",
            AssetType::Audio => "mp3",
            AssetType::Article => "html",
            AssetType::Pdf => "pdf",
            AssetType::Transcript => "txt",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(AssetType::Video),
            "audio" => Ok(AssetType::Audio),
            "article" => Ok(AssetType::Article),
            "pdf" => Ok(AssetType::Pdf),
            "transcript" => Ok(AssetType::Transcript),
            other => Err(SyncError::Generic(anyhow::anyhow!(
                "unknown asset type '{}'",
                other
            ))),
        }
    }
}

/// One discoverable unit of content from a source.
///
/// Items are rebuilt on every enumeration; only the `id` (and the manifest
/// entry written after a successful download) outlives a sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable identifier, unique within the source
    pub id: String,
    /// Id of the source that enumerated the item
    pub source_id: String,
    pub title: String,
    /// Human-facing page for the item
    pub url: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub asset_type: AssetType,
    /// Locator needed to materialize the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// The source denied access without this being an error
    #[serde(default)]
    pub restricted: bool,
}

impl ContentItem {
    /// Build an item with the required fields; optional fields start empty
    pub fn new(
        source_id: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        category: impl Into<String>,
        asset_type: AssetType,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            title: title.into(),
            url: String::new(),
            category: category.into(),
            subcategory: None,
            date: None,
            description: None,
            asset_type,
            download_url: None,
            restricted: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_download_url(mut self, download_url: impl Into<String>) -> Self {
        self.download_url = Some(download_url.into());
        self
    }

    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    /// Whether the item carries a usable download locator
    pub fn has_locator(&self) -> bool {
        self.download_url
            .as_deref()
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false)
    }

    /// Check the structural contract every source must honour.
    ///
    /// `expected_source` is the id of the source that produced the item.
    pub fn validate(&self, expected_source: &str) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SyncError::invalid_item(expected_source, "<empty>", "item id is empty"));
        }
        if self.source_id != expected_source {
            return Err(SyncError::invalid_item(
                expected_source,
                &self.id,
                format!("item claims source '{}'", self.source_id),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(SyncError::invalid_item(expected_source, &self.id, "item title is empty"));
        }
        if self.category.trim().is_empty() {
            return Err(SyncError::invalid_item(expected_source, &self.id, "item category is empty"));
        }
        Ok(())
    }
}

/// Static description of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub name: String,
    pub requires_auth: bool,
    pub asset_types: Vec<AssetType>,
    pub categories: Vec<String>,
}

/// Outcome of materializing a single item.
///
/// Expected failures (timeouts, 404s, access denied) are values, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialization {
    /// The asset was written to `path`
    Saved { path: PathBuf, message: String },
    /// The transfer failed; the item may be retried on a later run
    Failed { reason: String },
    /// The source denied access to the asset
    Restricted { reason: String },
}

impl Materialization {
    pub fn saved(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Materialization::Saved {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Materialization::Failed {
            reason: reason.into(),
        }
    }

    pub fn restricted(reason: impl Into<String>) -> Self {
        Materialization::Restricted {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Materialization::Saved { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Materialization::Saved { message, .. } => message,
            Materialization::Failed { reason } | Materialization::Restricted { reason } => reason,
        }
    }
}
