//! Archive folder layout and filename normalization.
//!
//! The fetch driver writes with these rules and the archive scanner reads
//! with them, so both sides agree on where an item lives.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::item::{AssetType, ContentItem};

/// Suffix of the metadata file written next to every saved asset
pub const SIDECAR_SUFFIX: &str = "_metadata.json";

const MAX_STEM_LEN: usize = 100;
const MAX_SLUG_LEN: usize = 50;
/// Hex digits of the hash appended to capped slugs and colliding stems
const HASH_LEN: usize = 8;

/// Folder scheme rooted at the archive directory
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<source_id>`
    pub fn source_dir(&self, source_id: &str) -> PathBuf {
        self.root.join(safe_filename(source_id))
    }

    /// `<root>/<source_id>/<category>[/<subcategory>]`
    pub fn item_dir(&self, item: &ContentItem) -> PathBuf {
        let mut dir = self.source_dir(&item.source_id).join(safe_filename(&item.category));
        if let Some(sub) = item.subcategory.as_deref().filter(|s| !s.trim().is_empty()) {
            dir.push(safe_filename(sub));
        }
        dir
    }

    /// File stem every asset of `item` starts with
    pub fn file_stem(item: &ContentItem) -> String {
        safe_filename(&item.title)
    }

    /// Stem to save `item` under in `dir`.
    ///
    /// This is the title stem unless files with that stem already belong to
    /// another item (a sidecar with a different id, or an asset without a
    /// sidecar). Then a short hash of the item id is appended.
    pub async fn available_stem(dir: &Path, item: &ContentItem) -> String {
        let stem = Self::file_stem(item);
        match stem_owner(dir, &stem).await {
            StemOwner::Free => stem,
            StemOwner::Item(id) if id == item.id => stem,
            _ => format!("{}_{}", stem, short_hash(&item.id)),
        }
    }

    /// Sidecar metadata path for a saved asset
    pub fn sidecar_for(asset: &Path) -> PathBuf {
        let stem = asset
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        asset.with_file_name(format!("{}{}", stem, SIDECAR_SUFFIX))
    }

    /// Asset stem a sidecar file belongs to
    pub fn file_stem_from_sidecar(sidecar: &Path) -> String {
        let name = sidecar
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.strip_suffix(SIDECAR_SUFFIX).unwrap_or(&name).to_string()
    }

    /// Key the scanner uses for a file found on disk, relative to the source dir
    pub fn stem_key(relative_dir: &Path, stem: &str) -> String {
        let dir = relative_dir
            .components()
            .map(|c| normalize_key(&c.as_os_str().to_string_lossy()))
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", dir, normalize_key(stem))
    }

    /// Key an enumerated item would have if a file for it were on disk
    pub fn item_stem_key(item: &ContentItem) -> String {
        let mut relative = PathBuf::from(safe_filename(&item.category));
        if let Some(sub) = item.subcategory.as_deref().filter(|s| !s.trim().is_empty()) {
            relative.push(safe_filename(sub));
        }
        Self::stem_key(&relative, &Self::file_stem(item))
    }
}

enum StemOwner {
    Free,
    /// Claimed by the sidecar of this item id
    Item(String),
    /// An asset with the stem exists but nothing says whose it is
    Unknown,
}

async fn stem_owner(dir: &Path, stem: &str) -> StemOwner {
    let sidecar = dir.join(format!("{}{}", stem, SIDECAR_SUFFIX));
    if let Ok(content) = fs::read_to_string(&sidecar).await {
        return match serde_json::from_str::<Sidecar>(&content) {
            Ok(meta) => StemOwner::Item(meta.id),
            Err(_) => StemOwner::Unknown,
        };
    }

    let Ok(mut entries) = fs::read_dir(dir).await else {
        return StemOwner::Free;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_asset = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ASSET_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)));
        if is_asset && path.file_stem().is_some_and(|s| s == stem) {
            return StemOwner::Unknown;
        }
    }
    StemOwner::Free
}

/// First hex digits of the sha256 of `text`
pub fn short_hash(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .take(HASH_LEN / 2)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Make `name` safe to use as a single path component
pub fn safe_filename(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join("_");
    let trimmed = collapsed.trim_matches(|c| c == '.' || c == '_');
    let capped: String = trimmed.chars().take(MAX_STEM_LEN).collect();
    let capped = capped.trim_end_matches(|c| c == '.' || c == '_');

    if capped.is_empty() {
        "untitled".to_string()
    } else {
        capped.to_string()
    }
}

/// Lowercase slug used to derive stable item ids from titles or guids.
///
/// Slugs longer than the cap keep their head and end in a hash of the full
/// text, so distinct long identities stay distinct.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;

    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' || c == '/' || c == '.' || c == ':' {
            pending_sep = true;
        }
    }

    if slug.is_empty() {
        return "unknown".to_string();
    }
    if slug.chars().count() <= MAX_SLUG_LEN {
        return slug;
    }

    let head: String = slug.chars().take(MAX_SLUG_LEN - HASH_LEN - 1).collect();
    format!("{}_{}", head.trim_end_matches('_'), short_hash(text))
}

/// Lowercase alphanumerics only; the comparison key for filenames
pub fn normalize_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Archive extension named by the last path segment of `url`, if recognized
pub fn extension_from_url(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = last.rsplit_once('.')?;
    ASSET_EXTENSIONS
        .iter()
        .copied()
        .find(|known| known.eq_ignore_ascii_case(ext))
}

/// Extensions the scanner recognizes as archived assets
pub const ASSET_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "wav", "aac", "ogg", "mp4", "webm", "mkv", "pdf", "html", "txt",
];

/// Metadata written next to each saved asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub id: String,
    pub source_id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<chrono::NaiveDate>,
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&ContentItem> for Sidecar {
    fn from(item: &ContentItem) -> Self {
        Self {
            id: item.id.clone(),
            source_id: item.source_id.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
            date: item.date,
            asset_type: item.asset_type,
            download_url: item.download_url.clone(),
            description: item.description.clone(),
        }
    }
}
